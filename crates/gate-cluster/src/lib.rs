//! # gate-cluster
//!
//! Connection lifecycle for the cluster coordinator behind infergate.
//!
//! The [`ConnectionManager`] owns the only connection to the coordinator:
//! bounded-retry initialization with a fixed delay, liveness re-validation,
//! topology/resource snapshots and explicit reconnect. Coordinators plug in
//! through the [`ClusterCoordinator`] trait.

use thiserror::Error;

pub mod connection;
pub mod coordinator;
pub mod health;
pub mod http;

#[cfg(any(feature = "mock", test))]
pub mod mock;

pub use connection::{
    ClusterResources, ClusterSnapshot, ClusterStatus, ConnectionManager, ConnectionPhase,
    ConnectionState, PerformanceMetrics, ResourceUsage, RetryPolicy,
};
pub use coordinator::{ClusterCoordinator, ConnectOptions, NodeInfo, NodeSummary, ResourceMap};
pub use health::{assess_cluster_health, ClusterHealthReport};
pub use http::HttpCoordinator;

#[cfg(any(feature = "mock", test))]
pub use mock::MockCoordinator;

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Cluster connection errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Not connected to the cluster")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Coordinator error: {0}")]
    Coordinator(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClusterError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Connection(_) | ClusterError::Coordinator(_) | ClusterError::Http(_)
        )
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, ClusterError::NotConnected)
    }
}
