//! Gateway lifecycle

use crate::{api, Result};
use gate_cluster::{ClusterCoordinator, ConnectionManager, HttpCoordinator, MockCoordinator};
use gate_core::Config;
use gate_monitor::{
    EngineProbe, HealthMonitor, HostResourceSampler, MockEngine, ResourceSampler, VllmEngine,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

/// Shared services handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub monitor: Arc<HealthMonitor>,
    pub engine: Arc<dyn EngineProbe>,
    pub cluster: Arc<ConnectionManager>,
    /// Host view served by the system metrics endpoint
    pub system: Arc<HostResourceSampler>,
    pub started_at: Instant,
}

/// The running infergate process
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub(crate) fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Connect to the cluster and start monitoring, as configured.
    ///
    /// A failed cluster connection is logged and the gateway keeps running;
    /// cluster endpoints answer 503 until a reconnect succeeds.
    pub async fn start(&self) -> Result<()> {
        let config = &self.state.config;
        info!(engine = self.state.engine.name(), "Starting infergate");

        if config.cluster.connect_on_startup {
            if !self.state.cluster.initialize().await {
                warn!(
                    address = %config.cluster.address,
                    "Cluster unavailable at startup, continuing without it"
                );
            }
        }

        if config.monitoring.enabled {
            self.state
                .monitor
                .start_monitoring(Arc::clone(&self.state.engine), Some(config.monitoring.interval()))
                .await;
        }

        info!("infergate started");
        Ok(())
    }

    /// Stop monitoring and close the cluster connection
    pub async fn stop(&self) {
        info!("Stopping infergate");
        self.state.monitor.stop_monitoring().await;
        self.state.cluster.shutdown().await;
        info!("infergate stopped");
    }

    /// Start, serve the API until a shutdown signal arrives, then stop
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let bind_addr = self.state.config.server.bind_addr;
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.stop().await;
                return Err(e.into());
            }
        };
        info!("Serving API on {}", bind_addr);

        let app = api::create_router(self.state.clone());
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_termination())
            .await;

        self.stop().await;
        served?;
        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::SignalKind;

    let mut sigterm = match signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received Ctrl+C signal"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = signal::ctrl_c().await;
    info!("Received Ctrl+C signal");
}

/// Builder for creating gateways
pub struct GatewayBuilder {
    config: Option<Config>,
    engine: Option<Arc<dyn EngineProbe>>,
    coordinator: Option<Arc<dyn ClusterCoordinator>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            engine: None,
            coordinator: None,
            sampler: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this engine instead of the configured one
    pub fn with_engine(mut self, engine: Arc<dyn EngineProbe>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use this coordinator instead of the configured one
    pub fn with_coordinator(mut self, coordinator: Arc<dyn ClusterCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let engine: Arc<dyn EngineProbe> = match self.engine {
            Some(engine) => engine,
            None if config.engine.mock => {
                info!("Using mock inference engine");
                Arc::new(MockEngine::new())
            }
            None => Arc::new(VllmEngine::from_config(&config.engine)?),
        };

        let coordinator: Arc<dyn ClusterCoordinator> = match self.coordinator {
            Some(coordinator) => coordinator,
            None if config.cluster.mock => {
                info!("Using mock cluster coordinator");
                Arc::new(MockCoordinator::new())
            }
            None => Arc::new(HttpCoordinator::from_config(&config.cluster)?),
        };

        // One host sampler so NVML is initialized once
        let system = Arc::new(HostResourceSampler::new());
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::clone(&system) as Arc<dyn ResourceSampler>);
        let monitor = HealthMonitor::with_sampler(&config.monitoring, sampler);

        let cluster = ConnectionManager::new(coordinator, config.cluster.clone());

        Ok(Gateway::new(AppState {
            config: Arc::new(config),
            monitor: Arc::new(monitor),
            engine,
            cluster: Arc::new(cluster),
            system,
            started_at: Instant::now(),
        }))
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
