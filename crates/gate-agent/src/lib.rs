//! # gate-agent
//!
//! The infergate agent (`gated` daemon).
//!
//! Wires the health monitor and the cluster connection manager together,
//! exposes them over an HTTP API and owns the process lifecycle: connect to
//! the cluster, start monitoring, serve, then tear everything down on
//! shutdown.

pub mod agent;
pub mod api;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gate_core::{Config, LoggingConfig};
use serde_json::json;

// Re-export commonly used types
pub use agent::{AppState, Gateway, GatewayBuilder};
pub use api::create_router;

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing or invalid API key")]
    Unauthorized,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] gate_core::Error),

    #[error("Monitor error: {0}")]
    Monitor(#[from] gate_monitor::MonitorError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] gate_cluster::ClusterError),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// HTTP status returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::Unauthorized => StatusCode::UNAUTHORIZED,
            AgentError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Cluster(e) if e.is_not_connected() => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Monitor(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Core(e) => {
                StatusCode::from_u16(e.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }

        (
            status,
            Json(json!({
                "error": self.to_string(),
                "status": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response()
    }
}

/// Initialize logging and build the gateway
pub async fn init_gateway(config: &Config) -> Result<Gateway> {
    init_logging(&config.logging)?;

    tracing::info!("Initializing infergate with config: {:?}", config);

    GatewayBuilder::new().with_config(config.clone()).build()
}

/// Initialize logging and tracing. `RUST_LOG` overrides the configured level.
pub fn init_logging(logging_config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging_config.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging_config.show_target);

    let result = match logging_config.format.as_str() {
        "json" => subscriber.json().try_init(),
        _ => subscriber.try_init(),
    };

    result.map_err(|e| AgentError::Config(format!("Failed to initialize logging: {}", e)))
}
