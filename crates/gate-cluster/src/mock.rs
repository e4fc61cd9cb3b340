//! In-process coordinator double

use crate::coordinator::{
    ClusterCoordinator, ConnectOptions, NodeInfo, ResourceMap, RESOURCE_CPU, RESOURCE_GPU,
    RESOURCE_MEMORY,
};
use crate::{ClusterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Calls received by a [`MockCoordinator`], in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorCall {
    Connect,
    IsInitialized,
    ClusterResources,
    AvailableResources,
    ListNodes,
    Shutdown,
}

/// Scriptable coordinator with a two-node, two-GPU cluster by default
pub struct MockCoordinator {
    initialized: AtomicBool,
    connect_failures: AtomicU32,
    resource_failure: AtomicBool,
    liveness_delay: Mutex<Option<Duration>>,
    cluster: Mutex<ResourceMap>,
    available: Mutex<ResourceMap>,
    nodes: Mutex<Vec<NodeInfo>>,
    calls: Mutex<Vec<CoordinatorCall>>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        let cluster = ResourceMap::from([
            (RESOURCE_CPU.to_string(), 16.0),
            (RESOURCE_GPU.to_string(), 2.0),
            (RESOURCE_MEMORY.to_string(), 64.0e9),
        ]);
        let available = ResourceMap::from([
            (RESOURCE_CPU.to_string(), 12.0),
            (RESOURCE_GPU.to_string(), 1.0),
            (RESOURCE_MEMORY.to_string(), 48.0e9),
        ]);
        let nodes = (0..2)
            .map(|i| NodeInfo {
                node_id: format!("node-{}", i),
                alive: true,
                resources: ResourceMap::from([
                    (RESOURCE_CPU.to_string(), 8.0),
                    (RESOURCE_GPU.to_string(), 1.0),
                ]),
                address: format!("10.0.0.{}", i + 1),
                port: 6379,
            })
            .collect();

        Self {
            initialized: AtomicBool::new(false),
            connect_failures: AtomicU32::new(0),
            resource_failure: AtomicBool::new(false),
            liveness_delay: Mutex::new(None),
            cluster: Mutex::new(cluster),
            available: Mutex::new(available),
            nodes: Mutex::new(nodes),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `n` connect calls
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every connect call until reset with `fail_next_connects(0)`
    pub fn fail_all_connects(&self) {
        self.fail_next_connects(u32::MAX);
    }

    /// Simulate the coordinator session dropping or coming back
    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    /// Delay the answer of the next `is_initialized` call. The session state
    /// is read before the delay.
    pub fn delay_next_liveness(&self, delay: Duration) {
        *self.liveness_delay.lock() = Some(delay);
    }

    pub fn set_resource_failure(&self, fail: bool) {
        self.resource_failure.store(fail, Ordering::SeqCst);
    }

    pub fn set_resources(&self, cluster: ResourceMap, available: ResourceMap) {
        *self.cluster.lock() = cluster;
        *self.available.lock() = available;
    }

    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.lock() = nodes;
    }

    pub fn calls(&self) -> Vec<CoordinatorCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, call: CoordinatorCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Lifecycle calls only (connect and shutdown), in order
    pub fn lifecycle_calls(&self) -> Vec<CoordinatorCall> {
        self.calls
            .lock()
            .iter()
            .copied()
            .filter(|c| matches!(c, CoordinatorCall::Connect | CoordinatorCall::Shutdown))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn log(&self, call: CoordinatorCall) {
        self.calls.lock().push(call);
    }

    fn check_resources(&self) -> Result<()> {
        if self.resource_failure.load(Ordering::SeqCst) {
            return Err(ClusterError::Coordinator("resource query failed".to_string()));
        }
        Ok(())
    }
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterCoordinator for MockCoordinator {
    async fn connect(&self, options: &ConnectOptions) -> Result<()> {
        self.log(CoordinatorCall::Connect);

        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(ClusterError::Connection(format!(
                "Failed to reach {}",
                options.address
            )));
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.log(CoordinatorCall::IsInitialized);
        let initialized = self.initialized.load(Ordering::SeqCst);

        let delay = self.liveness_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        initialized
    }

    async fn cluster_resources(&self) -> Result<ResourceMap> {
        self.log(CoordinatorCall::ClusterResources);
        self.check_resources()?;
        Ok(self.cluster.lock().clone())
    }

    async fn available_resources(&self) -> Result<ResourceMap> {
        self.log(CoordinatorCall::AvailableResources);
        self.check_resources()?;
        Ok(self.available.lock().clone())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.log(CoordinatorCall::ListNodes);
        self.check_resources()?;
        Ok(self.nodes.lock().clone())
    }

    async fn shutdown(&self) -> Result<()> {
        self.log(CoordinatorCall::Shutdown);
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions {
            address: "ray://head:10001".to_string(),
            namespace: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let coordinator = MockCoordinator::new();
        coordinator.fail_next_connects(2);

        assert!(coordinator.connect(&options()).await.is_err());
        assert!(coordinator.connect(&options()).await.is_err());
        assert!(!coordinator.is_initialized().await);
        assert!(coordinator.connect(&options()).await.is_ok());
        assert!(coordinator.is_initialized().await);
        assert_eq!(coordinator.call_count(CoordinatorCall::Connect), 3);
    }

    #[tokio::test]
    async fn test_shutdown_clears_session() {
        let coordinator = MockCoordinator::new();
        coordinator.connect(&options()).await.unwrap();
        coordinator.shutdown().await.unwrap();
        assert!(!coordinator.is_initialized().await);
        assert_eq!(
            coordinator.lifecycle_calls(),
            vec![CoordinatorCall::Connect, CoordinatorCall::Shutdown]
        );
    }

    #[tokio::test]
    async fn test_resource_failure_injection() {
        let coordinator = MockCoordinator::new();
        assert_eq!(coordinator.list_nodes().await.unwrap().len(), 2);

        coordinator.set_resource_failure(true);
        assert!(coordinator.cluster_resources().await.is_err());
        assert!(coordinator.list_nodes().await.is_err());
    }
}
