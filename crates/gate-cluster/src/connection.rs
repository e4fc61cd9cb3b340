//! Cluster connection lifecycle

use crate::coordinator::{
    resource, ClusterCoordinator, ConnectOptions, NodeSummary, ResourceMap, RESOURCE_CPU,
    RESOURCE_GPU, RESOURCE_MEMORY,
};
use crate::health::{assess_cluster_health, utilization, ClusterHealthReport};
use crate::{ClusterError, Result};
use chrono::{DateTime, Utc};
use gate_core::ClusterConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl From<&ClusterConfig> for RetryPolicy {
    fn from(config: &ClusterConfig) -> Self {
        Self::new(config.max_retry_attempts, config.retry_delay())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Connected => write!(f, "connected"),
        }
    }
}

/// Topology and resources captured when a connection is established
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster_resources: ResourceMap,
    pub available_resources: ResourceMap,
    pub nodes: NodeSummary,
    pub dashboard_url: Option<String>,
    pub namespace: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Duration of the successful attempt
    pub connect_time: Option<Duration>,
    /// Attempts used by the last initialize call
    pub attempt_count: u32,
    pub snapshot: Option<ClusterSnapshot>,
    connected_since: Option<Instant>,
    /// Bumped on every successful connect
    epoch: u64,
}

impl ConnectionState {
    fn uptime(&self) -> Duration {
        self.connected_since
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }
}

/// Fresh resource totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResources {
    pub cluster_resources: ResourceMap,
    pub available_resources: ResourceMap,
    pub timestamp: DateTime<Utc>,
}

/// Connection details plus fresh resources and nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub connected: bool,
    pub connection_time_seconds: Option<f64>,
    pub connection_attempts: u32,
    pub uptime_seconds: f64,
    pub resources: ClusterResources,
    pub nodes: NodeSummary,
    pub dashboard_url: Option<String>,
    pub namespace: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub total: f64,
    pub available: f64,
    pub used: f64,
}

impl ResourceUsage {
    fn of(cluster: &ResourceMap, available: &ResourceMap, name: &str) -> Self {
        let total = resource(cluster, name);
        let available = resource(available, name);
        Self {
            total,
            available,
            used: total - available,
        }
    }
}

/// Utilisation derived from totals and available resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub cpu_utilization: f64,
    pub gpu_utilization: f64,
    pub memory_utilization: f64,
    pub resources: BTreeMap<String, ResourceUsage>,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub fn from_resources(cluster: &ResourceMap, available: &ResourceMap) -> Self {
        let cpu = ResourceUsage::of(cluster, available, RESOURCE_CPU);
        let gpu = ResourceUsage::of(cluster, available, RESOURCE_GPU);
        let memory = ResourceUsage::of(cluster, available, RESOURCE_MEMORY);

        Self {
            cpu_utilization: utilization(cpu.total, cpu.available),
            gpu_utilization: utilization(gpu.total, gpu.available),
            memory_utilization: utilization(memory.total, memory.available),
            resources: BTreeMap::from([
                ("cpu".to_string(), cpu),
                ("gpu".to_string(), gpu),
                ("memory".to_string(), memory),
            ]),
            timestamp: Utc::now(),
        }
    }
}

/// Owns the connection to the cluster coordinator.
///
/// `initialize`, `reconnect` and `shutdown` are serialised: a caller arriving
/// while another transition is in progress waits for it to finish. After any
/// of them returns the state is either fully CONNECTED or DISCONNECTED.
pub struct ConnectionManager {
    coordinator: Arc<dyn ClusterCoordinator>,
    config: ClusterConfig,
    policy: RetryPolicy,
    lifecycle: Mutex<()>,
    state: RwLock<ConnectionState>,
    epochs: AtomicU64,
}

impl ConnectionManager {
    pub fn new(coordinator: Arc<dyn ClusterCoordinator>, config: ClusterConfig) -> Self {
        let policy = RetryPolicy::from(&config);
        Self {
            coordinator,
            config,
            policy,
            lifecycle: Mutex::new(()),
            state: RwLock::new(ConnectionState::default()),
            epochs: AtomicU64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Copy of the connection state, without contacting the coordinator
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.read().phase
    }

    /// Connect with bounded retries. Returns `false` once every attempt has
    /// failed; never returns an error.
    pub async fn initialize(&self) -> bool {
        let _transition = self.lifecycle.lock().await;
        self.initialize_locked().await
    }

    /// Shut down, then initialize, whatever the current state
    pub async fn reconnect(&self) -> bool {
        let _transition = self.lifecycle.lock().await;
        info!(address = %self.config.address, "Reconnecting to cluster");
        self.shutdown_locked().await;
        self.initialize_locked().await
    }

    /// Release the connection and clear the snapshot. No-op when disconnected.
    pub async fn shutdown(&self) {
        let _transition = self.lifecycle.lock().await;
        self.shutdown_locked().await;
    }

    async fn initialize_locked(&self) -> bool {
        if self.phase() == ConnectionPhase::Connected {
            info!("Cluster already connected");
            return true;
        }

        self.state.write().phase = ConnectionPhase::Connecting;
        let options = ConnectOptions::from(&self.config);
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            info!(
                attempt,
                max_attempts,
                address = %options.address,
                "Connecting to cluster coordinator"
            );
            let started = Instant::now();

            match self.try_connect(&options).await {
                Ok(snapshot) => {
                    let connect_time = started.elapsed();
                    info!(
                        attempt,
                        connect_time_seconds = connect_time.as_secs_f64(),
                        nodes = snapshot.nodes.total_nodes,
                        alive_nodes = snapshot.nodes.alive_nodes,
                        gpus = resource(&snapshot.cluster_resources, RESOURCE_GPU),
                        "Connected to cluster"
                    );

                    *self.state.write() = ConnectionState {
                        phase: ConnectionPhase::Connected,
                        connect_time: Some(connect_time),
                        attempt_count: attempt,
                        snapshot: Some(snapshot),
                        connected_since: Some(Instant::now()),
                        epoch: self.epochs.fetch_add(1, Ordering::SeqCst) + 1,
                    };
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Cluster connection attempt failed");
                    self.state.write().attempt_count = attempt;

                    if attempt < max_attempts {
                        info!(
                            delay_seconds = self.policy.delay.as_secs_f64(),
                            "Retrying cluster connection"
                        );
                        tokio::time::sleep(self.policy.delay).await;
                    } else {
                        error!(
                            attempts = attempt,
                            address = %options.address,
                            error = %e,
                            "Giving up on cluster connection"
                        );
                    }
                }
            }
        }

        let mut state = self.state.write();
        state.phase = ConnectionPhase::Disconnected;
        state.snapshot = None;
        state.connect_time = None;
        state.connected_since = None;
        false
    }

    /// One attempt: connect, confirm the session and capture a snapshot
    async fn try_connect(&self, options: &ConnectOptions) -> Result<ClusterSnapshot> {
        self.coordinator.connect(options).await?;

        let snapshot = async {
            if !self.coordinator.is_initialized().await {
                return Err(ClusterError::Connection(
                    "Coordinator did not report an initialized session".to_string(),
                ));
            }
            self.collect_snapshot().await
        }
        .await;

        if snapshot.is_err() {
            // Release the half-open session before the next attempt
            if let Err(e) = self.coordinator.shutdown().await {
                debug!(error = %e, "Failed to release partial cluster connection");
            }
        }

        snapshot
    }

    async fn collect_snapshot(&self) -> Result<ClusterSnapshot> {
        let (cluster_resources, available_resources) = self.fetch_resources().await?;
        let nodes = NodeSummary::from(self.coordinator.list_nodes().await?);

        Ok(ClusterSnapshot {
            cluster_resources,
            available_resources,
            nodes,
            dashboard_url: self.config.dashboard_url(),
            namespace: self.config.namespace.clone(),
            connected_at: Utc::now(),
        })
    }

    async fn fetch_resources(&self) -> Result<(ResourceMap, ResourceMap)> {
        let cluster = self.coordinator.cluster_resources().await?;
        let available = self.coordinator.available_resources().await?;
        Ok((cluster, available))
    }

    async fn shutdown_locked(&self) {
        if self.phase() == ConnectionPhase::Disconnected {
            debug!("Cluster connection already closed");
            return;
        }

        info!("Closing cluster connection");
        if let Err(e) = self.coordinator.shutdown().await {
            warn!(error = %e, "Coordinator shutdown reported an error");
        }

        *self.state.write() = ConnectionState::default();
        info!("Cluster connection closed");
    }

    /// Re-validate liveness with the coordinator. A coordinator that no
    /// longer reports an initialized session demotes the manager to
    /// DISCONNECTED. An answer about a connection that has since been
    /// replaced leaves the new connection alone.
    pub async fn is_connected(&self) -> bool {
        let epoch = {
            let state = self.state.read();
            if state.phase != ConnectionPhase::Connected {
                return false;
            }
            state.epoch
        };

        if self.coordinator.is_initialized().await {
            return true;
        }

        let mut state = self.state.write();
        if state.phase == ConnectionPhase::Connected && state.epoch != epoch {
            debug!("Ignoring liveness answer for a replaced cluster connection");
            return true;
        }
        if state.phase == ConnectionPhase::Connected {
            warn!("Coordinator session lost, marking cluster disconnected");
            *state = ConnectionState {
                attempt_count: state.attempt_count,
                ..Default::default()
            };
        }
        false
    }

    /// Connection details with freshly queried resources and nodes
    pub async fn get_cluster_status(&self) -> Result<ClusterStatus> {
        if !self.is_connected().await {
            return Err(ClusterError::NotConnected);
        }

        let (cluster_resources, available_resources) = self.fetch_resources().await?;
        let nodes = NodeSummary::from(self.coordinator.list_nodes().await?);
        let state = self.state();

        Ok(ClusterStatus {
            connected: true,
            connection_time_seconds: state.connect_time.map(|d| d.as_secs_f64()),
            connection_attempts: state.attempt_count,
            uptime_seconds: state.uptime().as_secs_f64(),
            resources: ClusterResources {
                cluster_resources,
                available_resources,
                timestamp: Utc::now(),
            },
            nodes,
            dashboard_url: state
                .snapshot
                .as_ref()
                .and_then(|s| s.dashboard_url.clone())
                .or_else(|| self.config.dashboard_url()),
            namespace: self.config.namespace.clone(),
            address: self.config.address.clone(),
        })
    }

    pub async fn get_cluster_resources(&self) -> Result<ClusterResources> {
        if !self.is_connected().await {
            return Err(ClusterError::NotConnected);
        }

        let (cluster_resources, available_resources) = self.fetch_resources().await?;
        Ok(ClusterResources {
            cluster_resources,
            available_resources,
            timestamp: Utc::now(),
        })
    }

    pub async fn performance_metrics(&self) -> Result<PerformanceMetrics> {
        let resources = self.get_cluster_resources().await?;
        Ok(PerformanceMetrics::from_resources(
            &resources.cluster_resources,
            &resources.available_resources,
        ))
    }

    /// Read-only health diagnostic. Uses the cached phase and never changes
    /// the connection state.
    pub async fn monitor_cluster_health(&self) -> ClusterHealthReport {
        let state = self.state();
        if state.phase != ConnectionPhase::Connected {
            return ClusterHealthReport::unavailable("Not connected to the cluster");
        }

        let probe = async {
            let (cluster, available) = self.fetch_resources().await?;
            let nodes = self.coordinator.list_nodes().await?;
            Ok::<_, ClusterError>(assess_cluster_health(
                &cluster,
                &available,
                &nodes,
                state.uptime().as_secs_f64(),
            ))
        };

        match probe.await {
            Ok(report) => {
                if !report.healthy {
                    warn!(warnings = ?report.warnings, "Cluster is unhealthy");
                }
                report
            }
            Err(e) => {
                warn!(error = %e, "Cluster health check failed");
                ClusterHealthReport::unavailable(format!("Health check failed: {}", e))
            }
        }
    }
}
