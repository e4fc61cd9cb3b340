//! Health monitor facade consumed by the HTTP layer

use crate::alerts::AlertReport;
use crate::checker::{HealthChecker, InferenceTestResult, StatusReport};
use crate::engine::EngineProbe;
use crate::health::HealthSnapshot;
use crate::history::{HistoricalData, HistoryStore};
use crate::metrics::MetricsWindow;
use crate::resources::ResourceSampler;
use crate::scheduler::MonitoringScheduler;
use gate_core::MonitoringConfig;
use std::sync::Arc;
use std::time::Duration;

/// Owns the checker and its scheduler. Constructed once per process and
/// shared behind an `Arc`.
pub struct HealthMonitor {
    checker: Arc<HealthChecker>,
    scheduler: MonitoringScheduler,
    default_interval: Duration,
}

impl HealthMonitor {
    pub fn new(checker: HealthChecker, default_interval: Duration) -> Self {
        let checker = Arc::new(checker);
        Self {
            scheduler: MonitoringScheduler::new(Arc::clone(&checker)),
            checker,
            default_interval,
        }
    }

    /// Monitor with host memory sampling
    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self::new(HealthChecker::from_config(config), config.interval())
    }

    /// Monitor with a custom resource sampler
    pub fn with_sampler(config: &MonitoringConfig, sampler: Arc<dyn ResourceSampler>) -> Self {
        let checker = HealthChecker::new(
            MetricsWindow::new(config.window_capacity),
            HistoryStore::new(config.history_capacity),
            config.thresholds.clone(),
            sampler,
        );
        Self::new(checker, config.interval())
    }

    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    pub fn record_request(&self, latency: f64, success: bool, tokens: u64) {
        self.checker.record_request(latency, success, tokens);
    }

    /// Cached snapshot, refreshed only by evaluation passes
    pub fn get_current_status(&self) -> Arc<HealthSnapshot> {
        self.checker.current()
    }

    pub fn status_report(&self) -> StatusReport {
        self.checker.status_report()
    }

    /// Immediate out-of-band evaluation, published like a scheduled one
    pub async fn run_health_check(&self, engine: &dyn EngineProbe) -> Arc<HealthSnapshot> {
        self.checker.perform_health_check(engine).await
    }

    pub async fn test_inference(
        &self,
        engine: &dyn EngineProbe,
        prompt: &str,
        max_tokens: u32,
    ) -> InferenceTestResult {
        self.checker.test_inference(engine, prompt, max_tokens).await
    }

    pub fn get_historical_data(&self, hours: u32) -> HistoricalData {
        self.checker.historical_data(hours)
    }

    pub fn current_alerts(&self) -> AlertReport {
        self.checker.current_alerts()
    }

    /// Start the loop at `interval`, or the configured default
    pub async fn start_monitoring(
        &self,
        engine: Arc<dyn EngineProbe>,
        interval: Option<Duration>,
    ) -> bool {
        self.scheduler
            .start(engine, interval.unwrap_or(self.default_interval))
            .await
    }

    pub async fn stop_monitoring(&self) {
        self.scheduler.stop().await;
    }

    pub async fn is_monitoring(&self) -> bool {
        self.scheduler.is_running().await
    }

    pub fn scheduler(&self) -> &MonitoringScheduler {
        &self.scheduler
    }
}
