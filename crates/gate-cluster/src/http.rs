//! Coordinator client over a JSON/HTTP gateway
//!
//! Gateway contract:
//!
//! | Method | Path                       | Body / response                         |
//! |--------|----------------------------|-----------------------------------------|
//! | POST   | `/api/cluster/connect`     | `{"address", "namespace"}`              |
//! | GET    | `/api/cluster/status`      | `{"initialized": bool}`                 |
//! | GET    | `/api/cluster/resources`   | `{"total": {..}, "available": {..}}`    |
//! | GET    | `/api/cluster/nodes`       | `[{"node_id", "alive", "resources", ..}]` |
//! | POST   | `/api/cluster/disconnect`  | empty                                   |

use crate::coordinator::{ClusterCoordinator, ConnectOptions, NodeInfo, ResourceMap};
use crate::{ClusterError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct StatusResponse {
    initialized: bool,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    total: ResourceMap,
    available: ResourceMap,
}

/// HTTP client for the coordinator gateway
pub struct HttpCoordinator {
    endpoint: Url,
    client: Client,
    session: AtomicBool,
}

impl HttpCoordinator {
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self> {
        info!("Creating coordinator client for endpoint: {}", endpoint);

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                ClusterError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoint,
            client,
            session: AtomicBool::new(false),
        })
    }

    /// Use the configured gateway, or the dashboard address of the head node
    pub fn from_config(config: &gate_core::ClusterConfig) -> Result<Self> {
        let endpoint = match &config.gateway_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let dashboard = config.dashboard_url().ok_or_else(|| {
                    ClusterError::Configuration(format!(
                        "Cannot derive a gateway endpoint from {}",
                        config.address
                    ))
                })?;
                Url::parse(&dashboard)
                    .map_err(|e| ClusterError::Configuration(format!("Invalid gateway URL: {}", e)))?
            }
        };

        Self::new(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| ClusterError::Configuration(format!("Invalid gateway URL: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!("Querying coordinator at: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClusterError::Connection(format!("Coordinator request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ClusterError::Coordinator(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ClusterError::InvalidResponse(format!("Invalid {} response: {}", path, e)))
    }

    async fn post(&self, path: &str, body: Option<&ConnectOptions>) -> Result<()> {
        let url = self.url(path)?;
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClusterError::Connection(format!("Coordinator request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClusterError::Coordinator(format!(
                "{} failed: {} - {}",
                path, status, error_text
            )));
        }

        Ok(())
    }

    async fn resources(&self) -> Result<ResourcesResponse> {
        self.get_json("api/cluster/resources").await
    }
}

#[async_trait]
impl ClusterCoordinator for HttpCoordinator {
    async fn connect(&self, options: &ConnectOptions) -> Result<()> {
        self.post("api/cluster/connect", Some(options)).await?;
        self.session.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        if !self.session.load(Ordering::SeqCst) {
            return false;
        }

        match self.get_json::<StatusResponse>("api/cluster/status").await {
            Ok(status) => status.initialized,
            Err(e) => {
                debug!(error = %e, "Coordinator status check failed");
                false
            }
        }
    }

    async fn cluster_resources(&self) -> Result<ResourceMap> {
        Ok(self.resources().await?.total)
    }

    async fn available_resources(&self) -> Result<ResourceMap> {
        Ok(self.resources().await?.available)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.get_json("api/cluster/nodes").await
    }

    async fn shutdown(&self) -> Result<()> {
        let was_connected = self.session.swap(false, Ordering::SeqCst);
        if was_connected {
            self.post("api/cluster/disconnect", None).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
