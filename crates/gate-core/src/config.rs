//! Configuration management for infergate
//!
//! Provides a unified configuration system that supports YAML files and
//! environment variable overrides on top of built-in defaults.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Allowed range for the monitoring interval, in seconds
pub const MONITORING_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 10..=300;

/// Allowed range for history lookbacks, in hours
pub const HISTORY_HOURS_RANGE: std::ops::RangeInclusive<u32> = 1..=168;

/// Main configuration structure for infergate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Inference engine configuration
    pub engine: EngineConfig,

    /// Health monitoring configuration
    pub monitoring: MonitoringConfig,

    /// Cluster coordinator configuration
    pub cluster: ClusterConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Ok(config_path) = std::env::var("INFERGATE_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./infergate.yaml", "/etc/infergate/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        // INFERGATE__MONITORING__INTERVAL_SECONDS=60 style overrides
        builder = builder.add_source(
            config::Environment::with_prefix("INFERGATE")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Serialize the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.monitoring.validate()?;
        self.cluster.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            monitoring: MonitoringConfig::default(),
            cluster: ClusterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API listens on
    pub bind_addr: SocketAddr,

    /// Bearer key required by mutating endpoints (disabled when unset)
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            api_key: None,
        }
    }
}

/// Inference engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine endpoint URL (OpenAI-compatible server)
    pub endpoint: Url,

    /// Served model name, used for inference self-tests
    pub model: String,

    /// Use the in-process mock engine instead of a real server
    pub mock: bool,

    /// Per-request timeout applied by the engine client
    pub request_timeout_seconds: u64,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(crate::Error::config("Engine model name cannot be empty"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(crate::Error::config("Engine request timeout must be > 0"));
        }

        Ok(())
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("http://localhost:8001").expect("valid default engine url"),
            model: "llama-3.2-3b-instruct".to_string(),
            mock: false,
            request_timeout_seconds: 300,
        }
    }
}

/// Health monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Start the background monitoring loop at startup
    pub enabled: bool,

    /// Seconds between scheduled health checks
    pub interval_seconds: u64,

    /// Lookback used by history queries that do not specify one
    pub default_history_hours: u32,

    /// Number of request samples kept in the rolling window
    pub window_capacity: usize,

    /// Number of health snapshots kept in history
    pub history_capacity: usize,

    /// Warning/critical thresholds
    pub thresholds: ThresholdConfig,
}

impl MonitoringConfig {
    pub fn validate(&self) -> Result<()> {
        validate_interval(self.interval_seconds)?;
        validate_history_hours(self.default_history_hours)?;

        if self.window_capacity == 0 {
            return Err(crate::Error::config("Window capacity must be > 0"));
        }

        if self.history_capacity == 0 {
            return Err(crate::Error::config("History capacity must be > 0"));
        }

        self.thresholds.validate()
    }

    /// Monitoring interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            default_history_hours: 24,
            window_capacity: 100,
            history_capacity: 100,
            thresholds: ThresholdConfig::default(),
        }
    }
}

/// Check a monitoring interval against the allowed range
pub fn validate_interval(seconds: u64) -> Result<()> {
    if !MONITORING_INTERVAL_RANGE.contains(&seconds) {
        return Err(crate::Error::invalid_request(format!(
            "Monitoring interval must be between {} and {} seconds, got {}",
            MONITORING_INTERVAL_RANGE.start(),
            MONITORING_INTERVAL_RANGE.end(),
            seconds
        )));
    }
    Ok(())
}

/// Check a history lookback against the allowed range
pub fn validate_history_hours(hours: u32) -> Result<()> {
    if !HISTORY_HOURS_RANGE.contains(&hours) {
        return Err(crate::Error::invalid_request(format!(
            "History range must be between {} and {} hours, got {}",
            HISTORY_HOURS_RANGE.start(),
            HISTORY_HOURS_RANGE.end(),
            hours
        )));
    }
    Ok(())
}

/// A two-level boundary for a single metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Warning/critical thresholds for every classified metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// p95 response time, seconds
    pub response_time_p95: Threshold,

    /// Lifetime error rate, 0-1
    pub error_rate: Threshold,

    /// Accelerator memory usage, percent
    pub accelerator_memory_percent: Threshold,

    /// Accelerator temperature, Celsius
    pub accelerator_temperature: Threshold,
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        let pairs = [
            ("response_time_p95", self.response_time_p95),
            ("error_rate", self.error_rate),
            ("accelerator_memory_percent", self.accelerator_memory_percent),
            ("accelerator_temperature", self.accelerator_temperature),
        ];

        for (name, threshold) in pairs {
            if !threshold.warning.is_finite() || !threshold.critical.is_finite() {
                return Err(crate::Error::config(format!(
                    "Threshold {} must be a finite number",
                    name
                )));
            }
            if threshold.warning < 0.0 || threshold.critical < 0.0 {
                return Err(crate::Error::config(format!(
                    "Threshold {} must be non-negative",
                    name
                )));
            }
            if threshold.warning > threshold.critical {
                return Err(crate::Error::config(format!(
                    "Threshold {}: warning ({}) exceeds critical ({})",
                    name, threshold.warning, threshold.critical
                )));
            }
        }

        if self.error_rate.critical > 1.0 {
            return Err(crate::Error::config("Error rate thresholds must be within 0-1"));
        }

        Ok(())
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            response_time_p95: Threshold::new(5.0, 10.0),
            error_rate: Threshold::new(0.05, 0.15),
            accelerator_memory_percent: Threshold::new(90.0, 98.0),
            accelerator_temperature: Threshold::new(80.0, 90.0),
        }
    }
}

/// Cluster coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Coordinator address, e.g. `ray://ray-head:10001`
    pub address: String,

    /// Namespace the gateway joins
    pub namespace: String,

    /// HTTP endpoint of the coordinator gateway; derived from the address when unset
    pub gateway_endpoint: Option<Url>,

    /// Port of the coordinator dashboard on the head node
    pub dashboard_port: u16,

    /// Connection attempts made by a single initialize call
    pub max_retry_attempts: u32,

    /// Fixed delay between connection attempts
    pub retry_delay_seconds: u64,

    /// Connect during startup
    pub connect_on_startup: bool,

    /// Use the in-process mock coordinator
    pub mock: bool,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(crate::Error::config("Cluster address cannot be empty"));
        }

        if self.max_retry_attempts == 0 {
            return Err(crate::Error::config("Cluster retry attempts must be > 0"));
        }

        Ok(())
    }

    /// Delay between connection attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    /// Head node host extracted from a `ray://host:port` address
    pub fn head_host(&self) -> Option<&str> {
        let rest = self.address.strip_prefix("ray://")?;
        let host = rest.split(':').next()?;
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }

    /// Dashboard URL of the head node, if the address names one
    pub fn dashboard_url(&self) -> Option<String> {
        self.head_host()
            .map(|host| format!("http://{}:{}", host, self.dashboard_port))
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            address: "ray://ray-head:10001".to_string(),
            namespace: "vllm".to_string(),
            gateway_endpoint: None,
            dashboard_port: 8265,
            max_retry_attempts: 3,
            retry_delay_seconds: 5,
            connect_on_startup: true,
            mock: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Show target in logs
    pub show_target: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(crate::Error::config(format!("Invalid log level: {}", self.level))),
        }

        match self.format.as_str() {
            "text" | "json" => {}
            _ => return Err(crate::Error::config(format!("Invalid log format: {}", self.format))),
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitoring.window_capacity, 100);
        assert_eq!(config.monitoring.history_capacity, 100);
        assert_eq!(config.cluster.max_retry_attempts, 3);
        assert_eq!(config.cluster.retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_thresholds() {
        let thresholds = ThresholdConfig::default();
        assert_eq!(thresholds.response_time_p95, Threshold::new(5.0, 10.0));
        assert_eq!(thresholds.error_rate, Threshold::new(0.05, 0.15));
        assert_eq!(thresholds.accelerator_memory_percent, Threshold::new(90.0, 98.0));
        assert_eq!(thresholds.accelerator_temperature, Threshold::new(80.0, 90.0));
    }

    #[test]
    fn test_threshold_ordering_rejected() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.response_time_p95 = Threshold::new(10.0, 5.0);
        assert!(thresholds.validate().is_err());

        let mut thresholds = ThresholdConfig::default();
        thresholds.error_rate = Threshold::new(0.5, 1.5);
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_non_finite_thresholds_rejected() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.accelerator_temperature = Threshold::new(f64::NAN, 90.0);
        assert!(thresholds.validate().is_err());

        let mut thresholds = ThresholdConfig::default();
        thresholds.response_time_p95 = Threshold::new(5.0, f64::INFINITY);
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_interval_bounds() {
        assert!(validate_interval(10).is_ok());
        assert!(validate_interval(300).is_ok());
        assert!(validate_interval(9).is_err());
        assert!(validate_interval(301).is_err());

        let mut config = MonitoringConfig::default();
        config.interval_seconds = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_history_bounds() {
        assert!(validate_history_hours(1).is_ok());
        assert!(validate_history_hours(168).is_ok());
        assert!(validate_history_hours(0).is_err());
        assert!(validate_history_hours(169).is_err());
    }

    #[test]
    fn test_dashboard_url() {
        let config = ClusterConfig::default();
        assert_eq!(config.head_host(), Some("ray-head"));
        assert_eq!(config.dashboard_url().as_deref(), Some("http://ray-head:8265"));

        let config = ClusterConfig {
            address: "auto".to_string(),
            ..ClusterConfig::default()
        };
        assert_eq!(config.dashboard_url(), None);
    }

    #[test]
    fn test_logging_validation() {
        let mut logging = LoggingConfig::default();
        assert!(logging.validate().is_ok());

        logging.level = "verbose".to_string();
        assert!(logging.validate().is_err());

        logging.level = "debug".to_string();
        logging.format = "xml".to_string();
        assert!(logging.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "monitoring:\n  interval_seconds: 60\ncluster:\n  namespace: inference\n  max_retry_attempts: 5"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.monitoring.interval_seconds, 60);
        assert_eq!(config.cluster.namespace, "inference");
        assert_eq!(config.cluster.max_retry_attempts, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.monitoring.window_capacity, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "monitoring:\n  interval_seconds: 1").unwrap();

        assert!(Config::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infergate.yaml");

        let mut config = Config::default();
        config.server.api_key = Some("secret".to_string());
        config.to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
