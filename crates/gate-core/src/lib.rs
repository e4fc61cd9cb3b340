//! # gate-core
//!
//! Core configuration and error types shared by every infergate component.
//!
//! infergate fronts a remote inference engine that runs on a multi-node
//! cluster. This crate holds the pieces the monitor, the cluster connection
//! manager and the HTTP agent all agree on:
//!
//! - Configuration schema, layered loading and validation
//! - Warning/critical threshold tables
//! - The unified error type and result alias

pub mod config;
pub mod error;

// Re-export commonly used types at the crate root
pub use config::{
    ClusterConfig, Config, EngineConfig, LoggingConfig, MonitoringConfig, ServerConfig, Threshold,
    ThresholdConfig,
};
pub use error::{Error, Result};
