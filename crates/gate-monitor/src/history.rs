//! Bounded snapshot history

use crate::health::{HealthSnapshot, HealthState};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Default number of snapshots retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// FIFO ring of health snapshots
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    snapshots: RwLock<VecDeque<Arc<HealthSnapshot>>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a snapshot, evicting the oldest when full
    pub fn append(&self, snapshot: Arc<HealthSnapshot>) {
        let mut snapshots = self.snapshots.write();
        if snapshots.len() == self.capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot);
    }

    /// Snapshots newer than `now - since_hours`, oldest first
    pub fn query(&self, since_hours: u32) -> Vec<Arc<HealthSnapshot>> {
        self.query_since(Utc::now() - Duration::hours(i64::from(since_hours)))
    }

    /// Snapshots strictly newer than `cutoff`, oldest first
    pub fn query_since(&self, cutoff: DateTime<Utc>) -> Vec<Arc<HealthSnapshot>> {
        self.snapshots
            .read()
            .iter()
            .filter(|snapshot| snapshot.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// The last `n` snapshots, oldest first
    pub fn recent(&self, n: usize) -> Vec<Arc<HealthSnapshot>> {
        let snapshots = self.snapshots.read();
        let skip = snapshots.len().saturating_sub(n);
        snapshots.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<HealthSnapshot>> {
        self.snapshots.read().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Aggregate view over a set of snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_snapshots: usize,
    pub avg_response_time: f64,
    pub max_response_time: f64,
    pub avg_error_rate: f64,
    pub status_distribution: BTreeMap<HealthState, usize>,
    pub uptime_percentage: f64,
}

/// Summarize snapshots.
///
/// Response time figures skip snapshots without latency data (zero average),
/// so ERROR and LOADING passes do not drag the average down.
pub fn summarize(snapshots: &[Arc<HealthSnapshot>]) -> HistorySummary {
    if snapshots.is_empty() {
        return HistorySummary::default();
    }

    let total = snapshots.len();
    let response_times: Vec<f64> = snapshots
        .iter()
        .map(|s| s.response_time_avg)
        .filter(|&t| t > 0.0)
        .collect();

    let (avg_response_time, max_response_time) = if response_times.is_empty() {
        (0.0, 0.0)
    } else {
        (
            response_times.iter().sum::<f64>() / response_times.len() as f64,
            response_times.iter().copied().fold(0.0, f64::max),
        )
    };

    let mut status_distribution = BTreeMap::new();
    for snapshot in snapshots {
        *status_distribution.entry(snapshot.status).or_insert(0) += 1;
    }

    let up = snapshots.iter().filter(|s| s.status.is_up()).count();

    HistorySummary {
        total_snapshots: total,
        avg_response_time,
        max_response_time,
        avg_error_rate: snapshots.iter().map(|s| s.error_rate).sum::<f64>() / total as f64,
        status_distribution,
        uptime_percentage: up as f64 / total as f64 * 100.0,
    }
}

/// Snapshots and their summary for a lookback window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalData {
    pub timeframe_hours: u32,
    pub data_points: usize,
    pub data: Vec<HealthSnapshot>,
    pub summary: HistorySummary,
}

impl HistoricalData {
    pub fn new(timeframe_hours: u32, snapshots: Vec<Arc<HealthSnapshot>>) -> Self {
        let summary = summarize(&snapshots);
        Self {
            timeframe_hours,
            data_points: snapshots.len(),
            data: snapshots.iter().map(|s| HealthSnapshot::clone(s)).collect(),
            summary,
        }
    }
}
