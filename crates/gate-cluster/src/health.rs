//! Read-only cluster health diagnostics

use crate::coordinator::{resource, NodeInfo, ResourceMap, RESOURCE_GPU};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorSummary {
    pub gpu_total: f64,
    pub gpu_available: f64,
    pub gpu_utilization: f64,
}

/// Outcome of a cluster health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealthReport {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub nodes: NodeCounts,
    pub resources: AcceleratorSummary,
    pub uptime_seconds: f64,
    pub last_check: DateTime<Utc>,
    pub warnings: Vec<String>,
}

impl ClusterHealthReport {
    /// Report for a probe that could not run
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: Some(reason.into()),
            nodes: NodeCounts::default(),
            resources: AcceleratorSummary::default(),
            uptime_seconds: 0.0,
            last_check: Utc::now(),
            warnings: Vec::new(),
        }
    }
}

/// Healthy means at least one node, every known node alive, and at least one
/// accelerator in the cluster.
pub fn assess_cluster_health(
    cluster: &ResourceMap,
    available: &ResourceMap,
    nodes: &[NodeInfo],
    uptime_seconds: f64,
) -> ClusterHealthReport {
    let total = nodes.len();
    let alive = nodes.iter().filter(|n| n.alive).count();
    let dead = total - alive;

    let gpu_total = resource(cluster, RESOURCE_GPU);
    let gpu_available = resource(available, RESOURCE_GPU);

    let mut warnings = Vec::new();
    if dead > 0 {
        warnings.push(format!("{} node(s) offline", dead));
    }
    if gpu_total <= 0.0 {
        warnings.push("No GPU resources found in the cluster".to_string());
    } else if gpu_available <= 0.0 {
        warnings.push("No GPUs available".to_string());
    }

    ClusterHealthReport {
        healthy: alive > 0 && dead == 0 && gpu_total > 0.0,
        reason: None,
        nodes: NodeCounts { total, alive, dead },
        resources: AcceleratorSummary {
            gpu_total,
            gpu_available,
            gpu_utilization: utilization(gpu_total, gpu_available),
        },
        uptime_seconds,
        last_check: Utc::now(),
        warnings,
    }
}

/// Percentage of `total` in use, rounded to two decimals
pub(crate) fn utilization(total: f64, available: f64) -> f64 {
    if total > 0.0 {
        ((total - available) / total * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(alive: bool) -> NodeInfo {
        NodeInfo {
            node_id: format!("node-{}", alive),
            alive,
            resources: ResourceMap::new(),
            address: String::new(),
            port: 0,
        }
    }

    fn gpus(n: f64) -> ResourceMap {
        ResourceMap::from([(RESOURCE_GPU.to_string(), n)])
    }

    #[test]
    fn test_healthy_cluster() {
        let report = assess_cluster_health(&gpus(4.0), &gpus(1.0), &[node(true), node(true)], 12.0);
        assert!(report.healthy);
        assert!(report.warnings.is_empty());
        assert_eq!(report.resources.gpu_utilization, 75.0);
        assert_eq!(report.nodes.alive, 2);
    }

    #[test]
    fn test_dead_node_is_unhealthy() {
        let report = assess_cluster_health(&gpus(4.0), &gpus(4.0), &[node(true), node(false)], 0.0);
        assert!(!report.healthy);
        assert_eq!(report.nodes.dead, 1);
        assert_eq!(report.warnings, vec!["1 node(s) offline".to_string()]);
    }

    #[test]
    fn test_missing_accelerators_is_unhealthy() {
        let report = assess_cluster_health(&ResourceMap::new(), &ResourceMap::new(), &[node(true)], 0.0);
        assert!(!report.healthy);
        assert_eq!(report.resources.gpu_utilization, 0.0);
        assert!(report.warnings[0].contains("No GPU"));
    }

    #[test]
    fn test_no_nodes_is_unhealthy() {
        let report = assess_cluster_health(&gpus(1.0), &gpus(1.0), &[], 0.0);
        assert!(!report.healthy);
    }

    #[test]
    fn test_fully_claimed_gpus_warn_but_stay_healthy() {
        let report = assess_cluster_health(&gpus(2.0), &gpus(0.0), &[node(true)], 0.0);
        assert!(report.healthy);
        assert_eq!(report.warnings, vec!["No GPUs available".to_string()]);
        assert_eq!(report.resources.gpu_utilization, 100.0);
    }

    #[test]
    fn test_utilization_rounding() {
        assert_eq!(utilization(3.0, 2.0), 33.33);
        assert_eq!(utilization(0.0, 0.0), 0.0);
    }
}
