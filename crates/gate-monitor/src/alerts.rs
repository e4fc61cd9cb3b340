//! Threshold alerts
//!
//! Alerts are recomputed from scratch on every evaluation pass. Nothing is
//! accumulated or deduplicated across passes, so "current alerts" always
//! means the alerts attached to the latest snapshot.

use crate::health::{HealthSnapshot, ResourceReadings};
use chrono::{DateTime, Utc};
use gate_core::{Threshold, ThresholdConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Metrics that are compared against the threshold table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "response_time")]
    ResponseTime,
    #[serde(rename = "error_rate")]
    ErrorRate,
    #[serde(rename = "gpu_memory")]
    AcceleratorMemory,
    #[serde(rename = "gpu_temperature")]
    AcceleratorTemperature,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::ResponseTime,
        MetricKind::ErrorRate,
        MetricKind::AcceleratorMemory,
        MetricKind::AcceleratorTemperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ResponseTime => "response_time",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::AcceleratorMemory => "gpu_memory",
            MetricKind::AcceleratorTemperature => "gpu_temperature",
        }
    }

    /// The warning/critical pair configured for this metric
    pub fn threshold(&self, thresholds: &ThresholdConfig) -> Threshold {
        match self {
            MetricKind::ResponseTime => thresholds.response_time_p95,
            MetricKind::ErrorRate => thresholds.error_rate,
            MetricKind::AcceleratorMemory => thresholds.accelerator_memory_percent,
            MetricKind::AcceleratorTemperature => thresholds.accelerator_temperature,
        }
    }

    fn message(&self, value: f64) -> String {
        match self {
            MetricKind::ResponseTime => format!("Response time is high: {:.2}s", value),
            MetricKind::ErrorRate => format!("Error rate is high: {:.1}%", value * 100.0),
            MetricKind::AcceleratorMemory => format!("GPU memory usage is high: {:.1}%", value),
            MetricKind::AcceleratorTemperature => {
                format!("GPU temperature is high: {:.1}°C", value)
            }
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single threshold breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub metric_type: MetricKind,
    pub severity: Severity,
    pub message: String,
    pub threshold_value: f64,
}

/// Compare a reading against a threshold pair.
///
/// Comparisons are strict. Missing readings and NaN never trigger.
pub fn breach(value: Option<f64>, threshold: Threshold) -> Option<Severity> {
    let value = value?;
    if value > threshold.critical {
        Some(Severity::Critical)
    } else if value > threshold.warning {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// The four monitored readings, in alert order
pub(crate) fn readings(
    response_time_p95: f64,
    error_rate: f64,
    resources: &ResourceReadings,
) -> [(MetricKind, Option<f64>); 4] {
    [
        (MetricKind::ResponseTime, Some(response_time_p95)),
        (MetricKind::ErrorRate, Some(error_rate)),
        (MetricKind::AcceleratorMemory, resources.accelerator_memory_percent),
        (MetricKind::AcceleratorTemperature, resources.accelerator_temperature),
    ]
}

/// Compute the alerts for a snapshot, at most one per metric
pub fn evaluate_alerts(snapshot: &HealthSnapshot, thresholds: &ThresholdConfig) -> Vec<Alert> {
    readings(
        snapshot.response_time_p95,
        snapshot.error_rate,
        &snapshot.resources,
    )
    .into_iter()
    .filter_map(|(kind, value)| {
        let threshold = kind.threshold(thresholds);
        let severity = breach(value, threshold)?;
        let threshold_value = match severity {
            Severity::Critical => threshold.critical,
            Severity::Warning => threshold.warning,
        };
        Some(Alert {
            metric_type: kind,
            severity,
            message: kind.message(value.unwrap_or_default()),
            threshold_value,
        })
    })
    .collect()
}

/// Alerts of the latest snapshot, split by severity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertReport {
    pub timestamp: DateTime<Utc>,
    pub total_alerts: usize,
    pub critical_alerts: Vec<Alert>,
    pub warning_alerts: Vec<Alert>,
}

impl AlertReport {
    pub fn from_snapshot(snapshot: &HealthSnapshot) -> Self {
        let (critical_alerts, warning_alerts): (Vec<_>, Vec<_>) = snapshot
            .alerts
            .iter()
            .cloned()
            .partition(|alert| alert.severity == Severity::Critical);

        Self {
            timestamp: snapshot.timestamp,
            total_alerts: snapshot.alerts.len(),
            critical_alerts,
            warning_alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthState;

    fn snapshot(p95: f64, error_rate: f64, memory: Option<f64>, temp: Option<f64>) -> HealthSnapshot {
        HealthSnapshot {
            status: HealthState::Healthy,
            response_time_p95: p95,
            error_rate,
            resources: ResourceReadings {
                accelerator_memory_percent: memory,
                accelerator_temperature: temp,
                ..Default::default()
            },
            ..HealthSnapshot::unknown()
        }
    }

    #[test]
    fn test_no_alerts_when_healthy() {
        let alerts = evaluate_alerts(&snapshot(1.0, 0.0, Some(50.0), Some(60.0)), &ThresholdConfig::default());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_one_alert_per_breached_metric() {
        let thresholds = ThresholdConfig::default();
        let alerts = evaluate_alerts(&snapshot(12.0, 0.10, Some(99.0), Some(85.0)), &thresholds);

        assert_eq!(alerts.len(), 4);
        let kinds: Vec<_> = alerts.iter().map(|a| a.metric_type).collect();
        assert_eq!(kinds, MetricKind::ALL.to_vec());

        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].threshold_value, 10.0);
        assert_eq!(alerts[1].severity, Severity::Warning);
        assert_eq!(alerts[1].threshold_value, 0.05);
        assert_eq!(alerts[2].severity, Severity::Critical);
        assert_eq!(alerts[3].severity, Severity::Warning);
    }

    #[test]
    fn test_no_critical_below_critical_threshold() {
        let thresholds = ThresholdConfig::default();
        for p95 in [0.0, 4.9, 5.0, 7.5, 9.99, 10.0] {
            let alerts = evaluate_alerts(&snapshot(p95, 0.0, None, None), &thresholds);
            assert!(alerts.iter().all(|a| a.severity != Severity::Critical));
            assert!(alerts.len() <= 1);
        }
    }

    #[test]
    fn test_thresholds_are_strict() {
        let thresholds = ThresholdConfig::default();
        assert_eq!(breach(Some(5.0), thresholds.response_time_p95), None);
        assert_eq!(breach(Some(5.01), thresholds.response_time_p95), Some(Severity::Warning));
        assert_eq!(breach(Some(10.0), thresholds.response_time_p95), Some(Severity::Warning));
        assert_eq!(breach(Some(10.01), thresholds.response_time_p95), Some(Severity::Critical));
    }

    #[test]
    fn test_missing_readings_never_alert() {
        assert_eq!(breach(None, Threshold::new(0.0, 0.0)), None);
        assert_eq!(breach(Some(f64::NAN), Threshold::new(0.0, 0.0)), None);
    }

    #[test]
    fn test_alert_serialization() {
        let alerts = evaluate_alerts(&snapshot(11.0, 0.0, None, None), &ThresholdConfig::default());
        let json = serde_json::to_value(&alerts[0]).unwrap();
        assert_eq!(json["metric_type"], "response_time");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["message"], "Response time is high: 11.00s");
    }

    #[test]
    fn test_alert_report_split() {
        let snap = HealthSnapshot {
            alerts: evaluate_alerts(
                &snapshot(12.0, 0.10, None, None),
                &ThresholdConfig::default(),
            ),
            ..snapshot(12.0, 0.10, None, None)
        };

        let report = AlertReport::from_snapshot(&snap);
        assert_eq!(report.total_alerts, 2);
        assert_eq!(report.critical_alerts.len(), 1);
        assert_eq!(report.warning_alerts.len(), 1);
        assert_eq!(report.critical_alerts[0].metric_type, MetricKind::ResponseTime);
    }
}
