//! Cluster coordinator abstraction

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource name to quantity, e.g. `{"CPU": 16.0, "GPU": 2.0}`
pub type ResourceMap = BTreeMap<String, f64>;

pub const RESOURCE_CPU: &str = "CPU";
pub const RESOURCE_GPU: &str = "GPU";
pub const RESOURCE_MEMORY: &str = "memory";

/// Quantity of `name`, zero when absent
pub fn resource(map: &ResourceMap, name: &str) -> f64 {
    map.get(name).copied().unwrap_or(0.0)
}

/// A node as reported by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub alive: bool,
    #[serde(default)]
    pub resources: ResourceMap,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

/// Node list with alive/dead counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub total_nodes: usize,
    pub alive_nodes: usize,
    pub dead_nodes: usize,
    pub nodes: Vec<NodeInfo>,
}

impl From<Vec<NodeInfo>> for NodeSummary {
    fn from(nodes: Vec<NodeInfo>) -> Self {
        let alive_nodes = nodes.iter().filter(|n| n.alive).count();
        Self {
            total_nodes: nodes.len(),
            alive_nodes,
            dead_nodes: nodes.len() - alive_nodes,
            nodes,
        }
    }
}

/// Options passed to `connect`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub address: String,
    pub namespace: String,
}

impl From<&gate_core::ClusterConfig> for ConnectOptions {
    fn from(config: &gate_core::ClusterConfig) -> Self {
        Self {
            address: config.address.clone(),
            namespace: config.namespace.clone(),
        }
    }
}

/// The external cluster coordinator.
///
/// Implementations impose their own per-call timeouts; the connection
/// manager does not.
#[async_trait]
pub trait ClusterCoordinator: Send + Sync {
    /// Join the cluster
    async fn connect(&self, options: &ConnectOptions) -> Result<()>;

    /// Whether the coordinator session is live
    async fn is_initialized(&self) -> bool;

    /// Total resources across the cluster
    async fn cluster_resources(&self) -> Result<ResourceMap>;

    /// Currently unclaimed resources across the cluster
    async fn available_resources(&self) -> Result<ResourceMap>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Leave the cluster
    async fn shutdown(&self) -> Result<()>;

    fn name(&self) -> &str {
        "coordinator"
    }
}
