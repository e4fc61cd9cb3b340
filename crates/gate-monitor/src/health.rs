//! Health states, snapshots and classification

use crate::alerts::{breach, readings, Alert, Severity};
use crate::metrics::RequestStats;
use chrono::{DateTime, Utc};
use gate_core::ThresholdConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall health of the inference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Engine is still loading the model
    Loading,
    /// All monitored metrics are within their warning thresholds
    Healthy,
    /// At least one metric exceeds its warning threshold
    Degraded,
    /// At least one metric exceeds its critical threshold
    Unhealthy,
    /// The evaluation pass itself failed
    Error,
    /// No evaluation has happened yet
    Unknown,
}

impl HealthState {
    /// Whether this state counts as "up" for uptime accounting
    pub fn is_up(&self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Degraded)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Loading => "loading",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Error => "error",
            HealthState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Host and accelerator readings. Every field is optional; hosts without an
/// accelerator simply leave the accelerator fields empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceReadings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_utilization: Option<f64>,
}

impl ResourceReadings {
    /// Fill gaps in `self` with values from `other`
    pub fn or(self, other: ResourceReadings) -> Self {
        Self {
            memory_percent: self.memory_percent.or(other.memory_percent),
            accelerator_memory_percent: self
                .accelerator_memory_percent
                .or(other.accelerator_memory_percent),
            accelerator_temperature: self
                .accelerator_temperature
                .or(other.accelerator_temperature),
            accelerator_utilization: self
                .accelerator_utilization
                .or(other.accelerator_utilization),
        }
    }
}

/// The result of one evaluation pass. Never mutated once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub response_time_avg: f64,
    pub response_time_p95: f64,
    pub error_rate: f64,
    #[serde(flatten)]
    pub resources: ResourceReadings,
    pub throughput_tokens_per_second: f64,
    pub active_requests: u64,
    pub alerts: Vec<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthSnapshot {
    /// Placeholder used before the first evaluation
    pub fn unknown() -> Self {
        Self {
            status: HealthState::Unknown,
            timestamp: Utc::now(),
            response_time_avg: 0.0,
            response_time_p95: 0.0,
            error_rate: 0.0,
            resources: ResourceReadings::default(),
            throughput_tokens_per_second: 0.0,
            active_requests: 0,
            alerts: Vec::new(),
            detail: None,
        }
    }

    /// Snapshot for a pass that could not reach the engine
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: HealthState::Error,
            error_rate: 1.0,
            detail: Some(reason.into()),
            ..Self::unknown()
        }
    }

    pub fn critical_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(|alert| alert.severity == Severity::Critical)
    }
}

/// Classify request statistics and resource readings against thresholds.
///
/// Most severe match wins: any critical breach is UNHEALTHY, otherwise any
/// warning breach is DEGRADED, otherwise HEALTHY.
pub fn classify(
    stats: &RequestStats,
    resources: &ResourceReadings,
    thresholds: &ThresholdConfig,
) -> HealthState {
    let worst = readings(stats.percentiles.p95, stats.error_rate, resources)
        .into_iter()
        .filter_map(|(kind, value)| breach(value, kind.threshold(thresholds)))
        .max();

    match worst {
        Some(Severity::Critical) => HealthState::Unhealthy,
        Some(Severity::Warning) => HealthState::Degraded,
        None => HealthState::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Percentiles;

    fn stats(p95: f64, error_rate: f64) -> RequestStats {
        RequestStats {
            percentiles: Percentiles {
                p95,
                ..Default::default()
            },
            error_rate,
            ..Default::default()
        }
    }

    fn rank(state: HealthState) -> u8 {
        match state {
            HealthState::Healthy => 0,
            HealthState::Degraded => 1,
            HealthState::Unhealthy => 2,
            other => panic!("classify returned {other}"),
        }
    }

    #[test]
    fn test_classify_levels() {
        let thresholds = ThresholdConfig::default();
        let none = ResourceReadings::default();

        assert_eq!(classify(&stats(1.0, 0.0), &none, &thresholds), HealthState::Healthy);
        assert_eq!(classify(&stats(6.0, 0.0), &none, &thresholds), HealthState::Degraded);
        assert_eq!(classify(&stats(11.0, 0.0), &none, &thresholds), HealthState::Unhealthy);
        assert_eq!(classify(&stats(1.0, 0.10), &none, &thresholds), HealthState::Degraded);
        assert_eq!(classify(&stats(1.0, 0.20), &none, &thresholds), HealthState::Unhealthy);
    }

    #[test]
    fn test_critical_wins_over_warning() {
        let thresholds = ThresholdConfig::default();
        let hot = ResourceReadings {
            accelerator_temperature: Some(95.0),
            ..Default::default()
        };
        assert_eq!(classify(&stats(6.0, 0.10), &hot, &thresholds), HealthState::Unhealthy);
    }

    #[test]
    fn test_missing_accelerator_never_triggers() {
        let thresholds = ThresholdConfig::default();
        let host_only = ResourceReadings {
            memory_percent: Some(99.0),
            ..Default::default()
        };
        assert_eq!(classify(&stats(0.5, 0.0), &host_only, &thresholds), HealthState::Healthy);
    }

    #[test]
    fn test_classify_is_monotonic_per_metric() {
        let thresholds = ThresholdConfig::default();
        let steps: Vec<f64> = (0..=240).map(|i| i as f64 * 0.5).collect();

        let mut last = 0;
        for &p95 in &steps {
            let r = rank(classify(&stats(p95, 0.0), &ResourceReadings::default(), &thresholds));
            assert!(r >= last);
            last = r;
        }

        let mut last = 0;
        for i in 0..=100 {
            let rate = i as f64 / 100.0;
            let r = rank(classify(&stats(0.0, rate), &ResourceReadings::default(), &thresholds));
            assert!(r >= last);
            last = r;
        }

        let mut last = 0;
        for &temperature in &steps {
            let resources = ResourceReadings {
                accelerator_temperature: Some(temperature),
                ..Default::default()
            };
            let r = rank(classify(&stats(0.0, 0.0), &resources, &thresholds));
            assert!(r >= last);
            last = r;
        }

        let mut last = 0;
        for i in 0..=100 {
            let resources = ResourceReadings {
                accelerator_memory_percent: Some(i as f64),
                ..Default::default()
            };
            let r = rank(classify(&stats(0.0, 0.0), &resources, &thresholds));
            assert!(r >= last);
            last = r;
        }
    }

    #[test]
    fn test_readings_merge() {
        let host = ResourceReadings {
            memory_percent: Some(40.0),
            ..Default::default()
        };
        let engine = ResourceReadings {
            memory_percent: Some(10.0),
            accelerator_temperature: Some(70.0),
            ..Default::default()
        };

        let merged = host.or(engine);
        assert_eq!(merged.memory_percent, Some(40.0));
        assert_eq!(merged.accelerator_temperature, Some(70.0));
        assert_eq!(merged.accelerator_memory_percent, None);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = HealthSnapshot::error("connection refused");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error_rate"], 1.0);
        assert_eq!(json["detail"], "connection refused");
        assert!(json.get("accelerator_temperature").is_none());
        assert!(snapshot.alerts.is_empty());
    }
}
