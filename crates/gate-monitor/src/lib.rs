//! # gate-monitor
//!
//! Health monitoring for the inference engine behind infergate.
//!
//! This crate provides:
//! - A bounded rolling window of request latencies with lifetime counters
//! - Threshold-driven health classification and alert generation
//! - A bounded history of health snapshots with summary aggregation
//! - A cancellable background scheduler that probes the engine periodically
//! - Engine clients (vLLM over HTTP, and an in-process mock)
//!
//! ## Example
//!
//! ```rust,no_run
//! use gate_core::MonitoringConfig;
//! use gate_monitor::{HealthMonitor, VllmEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor = HealthMonitor::from_config(&MonitoringConfig::default());
//!     let engine = Arc::new(VllmEngine::new(
//!         "http://localhost:8001".parse()?,
//!         "llama-3.2-3b-instruct",
//!         std::time::Duration::from_secs(30),
//!     )?);
//!
//!     // Record a completed request
//!     monitor.record_request(1.2, true, 42);
//!
//!     // Run an immediate check
//!     let snapshot = monitor.run_health_check(engine.as_ref()).await;
//!     println!("Engine health: {}", snapshot.status);
//!
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod alerts;
pub mod checker;
pub mod engine;
pub mod health;
pub mod history;
pub mod metrics;
pub mod monitor;
pub mod resources;
pub mod scheduler;

#[cfg(any(feature = "mock", test))]
pub mod mock;

// Re-export main types
pub use alerts::{evaluate_alerts, Alert, AlertReport, MetricKind, Severity};
pub use checker::{HealthChecker, InferenceTestResult, StatusReport};
pub use engine::{AcceleratorReading, EngineProbe, EngineStatus, Generation, VllmEngine};
pub use health::{classify, HealthSnapshot, HealthState, ResourceReadings};
pub use history::{summarize, HistoricalData, HistoryStore, HistorySummary};
pub use metrics::{MetricSample, MetricsWindow, Percentiles, RequestStats};
pub use monitor::HealthMonitor;
pub use resources::{
    DiskUsage, HostResourceSampler, LoadAverage, ResourceSampler, StaticResources, SystemMetrics,
};
pub use scheduler::MonitoringScheduler;

#[cfg(any(feature = "mock", test))]
pub use mock::MockEngine;

/// Result type for monitoring operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while talking to the inference engine
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MonitorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MonitorError::Connection(_) | MonitorError::Probe(_) | MonitorError::Http(_)
        )
    }
}
