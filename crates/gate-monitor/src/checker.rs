//! Health evaluation passes

use crate::alerts::{evaluate_alerts, AlertReport};
use crate::engine::{EngineProbe, EngineStatus};
use crate::health::{classify, HealthSnapshot, HealthState, ResourceReadings};
use crate::history::{HistoricalData, HistoryStore};
use crate::metrics::MetricsWindow;
use crate::resources::{HostResourceSampler, ResourceSampler};
use chrono::{DateTime, Utc};
use gate_core::{MonitoringConfig, ThresholdConfig};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Latency recorded for a failed inference self-test
pub const FAILED_INFERENCE_LATENCY: f64 = 10.0;

/// Number of recent snapshots in a status report's distribution
const RECENT_STATUS_WINDOW: usize = 10;

/// Outcome of an inline inference self-test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceTestResult {
    pub success: bool,
    pub response_time: f64,
    pub tokens_generated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current snapshot plus monitoring bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub snapshot: HealthSnapshot,
    pub checks_performed: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub recent_status_distribution: BTreeMap<HealthState, usize>,
}

/// Owns the metrics window, history and the published "current" snapshot.
///
/// Snapshots are fully built before being swapped into the current cell, so
/// readers only ever observe complete evaluations.
pub struct HealthChecker {
    window: MetricsWindow,
    history: HistoryStore,
    thresholds: ThresholdConfig,
    sampler: Arc<dyn ResourceSampler>,
    current: RwLock<Arc<HealthSnapshot>>,
    checks_performed: AtomicU64,
}

impl HealthChecker {
    pub fn new(
        window: MetricsWindow,
        history: HistoryStore,
        thresholds: ThresholdConfig,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        Self {
            window,
            history,
            thresholds,
            sampler,
            current: RwLock::new(Arc::new(HealthSnapshot::unknown())),
            checks_performed: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self::new(
            MetricsWindow::new(config.window_capacity),
            HistoryStore::new(config.history_capacity),
            config.thresholds.clone(),
            Arc::new(HostResourceSampler::new()),
        )
    }

    pub fn window(&self) -> &MetricsWindow {
        &self.window
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Record a completed request into the rolling window
    pub fn record_request(&self, latency: f64, success: bool, tokens: u64) {
        self.window.record(latency, success, tokens);
    }

    /// Latest published snapshot, UNKNOWN before the first pass
    pub fn current(&self) -> Arc<HealthSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn checks_performed(&self) -> u64 {
        self.checks_performed.load(Ordering::Relaxed)
    }

    /// Build a snapshot from an engine report and the current window
    pub fn evaluate(&self, status: &EngineStatus) -> HealthSnapshot {
        let stats = self.window.stats();
        let engine_readings: ResourceReadings = status.accelerator.map(Into::into).unwrap_or_default();
        let resources = self.sampler.sample().or(engine_readings);

        let mut snapshot = HealthSnapshot {
            status: HealthState::Loading,
            timestamp: Utc::now(),
            response_time_avg: stats.percentiles.avg,
            response_time_p95: stats.percentiles.p95,
            error_rate: stats.error_rate,
            resources,
            throughput_tokens_per_second: stats.throughput_tokens_per_second,
            active_requests: status.active_requests,
            alerts: Vec::new(),
            detail: None,
        };

        if !status.initialized {
            snapshot.detail = Some("model is loading".to_string());
            return snapshot;
        }

        snapshot.status = classify(&stats, &resources, &self.thresholds);
        snapshot.alerts = evaluate_alerts(&snapshot, &self.thresholds);
        snapshot
    }

    /// Probe the engine, evaluate and publish. Probe failures become an
    /// ERROR snapshot; this never fails.
    pub async fn perform_health_check(&self, engine: &dyn EngineProbe) -> Arc<HealthSnapshot> {
        let snapshot = match engine.probe().await {
            Ok(status) => self.evaluate(&status),
            Err(e) => {
                warn!(engine = engine.name(), error = %e, "Engine probe failed");
                HealthSnapshot::error(e.to_string())
            }
        };

        let snapshot = self.publish(snapshot);

        match snapshot.status {
            HealthState::Unhealthy => error!(
                alerts = snapshot.alerts.len(),
                p95 = snapshot.response_time_p95,
                error_rate = snapshot.error_rate,
                "Engine is unhealthy"
            ),
            HealthState::Degraded => warn!(
                alerts = snapshot.alerts.len(),
                p95 = snapshot.response_time_p95,
                error_rate = snapshot.error_rate,
                "Engine is degraded"
            ),
            status => debug!(%status, "Health check complete"),
        }

        snapshot
    }

    /// Stamp and publish under the current-cell lock, so history stays in
    /// timestamp order when passes overlap.
    fn publish(&self, mut snapshot: HealthSnapshot) -> Arc<HealthSnapshot> {
        let mut current = self.current.write();
        snapshot.timestamp = Utc::now().max(current.timestamp);

        let snapshot = Arc::new(snapshot);
        self.history.append(Arc::clone(&snapshot));
        *current = Arc::clone(&snapshot);
        self.checks_performed.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    /// Time a short generation and feed the result into the window
    pub async fn test_inference(
        &self,
        engine: &dyn EngineProbe,
        prompt: &str,
        max_tokens: u32,
    ) -> InferenceTestResult {
        let started = Instant::now();
        let result = engine.generate(prompt, max_tokens).await;
        let response_time = started.elapsed().as_secs_f64();

        match result {
            Ok(generation) => {
                let success = !generation.text.is_empty();
                self.record_request(response_time, success, generation.tokens_generated);
                info!(
                    response_time,
                    tokens = generation.tokens_generated,
                    success,
                    "Inference test complete"
                );
                InferenceTestResult {
                    success,
                    response_time,
                    tokens_generated: generation.tokens_generated,
                    error: (!success).then(|| "empty generation".to_string()),
                }
            }
            Err(e) => {
                warn!(error = %e, "Inference test failed");
                self.record_request(FAILED_INFERENCE_LATENCY, false, 0);
                InferenceTestResult {
                    success: false,
                    response_time,
                    tokens_generated: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn status_report(&self) -> StatusReport {
        let current = self.current();
        let checks_performed = self.checks_performed();

        let mut recent_status_distribution = BTreeMap::new();
        for snapshot in self.history.recent(RECENT_STATUS_WINDOW) {
            *recent_status_distribution.entry(snapshot.status).or_insert(0) += 1;
        }

        StatusReport {
            last_check: (checks_performed > 0).then_some(current.timestamp),
            snapshot: HealthSnapshot::clone(&current),
            checks_performed,
            recent_status_distribution,
        }
    }

    pub fn historical_data(&self, hours: u32) -> HistoricalData {
        HistoricalData::new(hours, self.history.query(hours))
    }

    pub fn current_alerts(&self) -> AlertReport {
        AlertReport::from_snapshot(&self.current())
    }
}
