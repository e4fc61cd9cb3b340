//! Rolling request metrics

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples retained by a window
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// A single completed request observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// End-to-end latency in seconds
    pub latency: f64,

    /// Whether the request succeeded
    pub success: bool,

    /// Tokens produced by the request
    pub tokens: u64,
}

/// Latency statistics over the current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Request statistics consumed by health evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    pub percentiles: Percentiles,
    pub error_rate: f64,
    pub throughput_tokens_per_second: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Default)]
struct WindowInner {
    samples: VecDeque<MetricSample>,
    request_count: u64,
    error_count: u64,
    total_tokens: u64,
}

/// Bounded FIFO window of request samples plus lifetime counters.
///
/// The samples are evicted oldest-first once the window is full. The
/// request, error and token counters are cumulative and never evicted.
#[derive(Debug)]
pub struct MetricsWindow {
    capacity: usize,
    inner: Mutex<WindowInner>,
}

impl MetricsWindow {
    /// Create a window holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(WindowInner {
                samples: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
        }
    }

    /// Record a completed request
    pub fn record(&self, latency: f64, success: bool, tokens: u64) {
        let sample = MetricSample {
            latency: if latency.is_finite() { latency.max(0.0) } else { 0.0 },
            success,
            tokens,
        };

        let mut inner = self.inner.lock();
        if inner.samples.len() == self.capacity {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
        inner.request_count += 1;
        inner.total_tokens = inner.total_tokens.saturating_add(tokens);
        if !success {
            inner.error_count += 1;
        }
    }

    /// Latency statistics over the windowed samples
    pub fn percentiles(&self) -> Percentiles {
        let inner = self.inner.lock();
        compute_percentiles(&inner.samples)
    }

    /// Lifetime error rate in `[0, 1]`
    pub fn error_rate(&self) -> f64 {
        let inner = self.inner.lock();
        lifetime_error_rate(&inner)
    }

    /// Tokens per second of latency across the window
    pub fn throughput(&self) -> f64 {
        let inner = self.inner.lock();
        compute_throughput(&inner.samples)
    }

    /// All statistics taken under a single lock
    pub fn stats(&self) -> RequestStats {
        let inner = self.inner.lock();
        RequestStats {
            percentiles: compute_percentiles(&inner.samples),
            error_rate: lifetime_error_rate(&inner),
            throughput_tokens_per_second: compute_throughput(&inner.samples),
            request_count: inner.request_count,
            error_count: inner.error_count,
            total_tokens: inner.total_tokens,
        }
    }

    /// Copy of the samples currently in the window, oldest first
    pub fn samples(&self) -> Vec<MetricSample> {
        self.inner.lock().samples.iter().copied().collect()
    }

    pub fn request_count(&self) -> u64 {
        self.inner.lock().request_count
    }

    pub fn error_count(&self) -> u64 {
        self.inner.lock().error_count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

fn lifetime_error_rate(inner: &WindowInner) -> f64 {
    inner.error_count as f64 / inner.request_count.max(1) as f64
}

fn compute_throughput(samples: &VecDeque<MetricSample>) -> f64 {
    let tokens: u64 = samples.iter().map(|s| s.tokens).sum();
    let latency: f64 = samples.iter().map(|s| s.latency).sum();
    tokens as f64 / latency.max(1.0)
}

/// Index-based percentiles: `sorted[floor(len * q)]`, no interpolation
fn compute_percentiles(samples: &VecDeque<MetricSample>) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }

    let mut sorted: Vec<f64> = samples.iter().map(|s| s.latency).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let len = sorted.len();
    let at = |q: f64| {
        let index = ((len as f64) * q).floor() as usize;
        sorted[index.min(len - 1)]
    };

    Percentiles {
        avg: sorted.iter().sum::<f64>() / len as f64,
        p50: at(0.50),
        p95: at(0.95),
        p99: at(0.99),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_window() {
        let window = MetricsWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.percentiles(), Percentiles::default());
        assert_eq!(window.error_rate(), 0.0);
        assert_eq!(window.throughput(), 0.0);
    }

    #[test]
    fn test_percentiles_use_index_formula() {
        let window = MetricsWindow::new(100);
        for latency in 1..=10 {
            window.record(latency as f64, true, 1);
        }

        let p = window.percentiles();
        assert!((p.avg - 5.5).abs() < 1e-9);
        assert_eq!(p.p50, 6.0);
        assert_eq!(p.p95, 10.0);
        assert_eq!(p.p99, 10.0);
    }

    #[test]
    fn test_percentiles_sort_unordered_input() {
        let window = MetricsWindow::new(10);
        for latency in [3.0, 1.0, 2.0] {
            window.record(latency, true, 0);
        }

        let p = window.percentiles();
        assert_eq!(p.p50, 2.0);
        assert_eq!(p.p95, 3.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let window = MetricsWindow::new(3);
        for latency in 1..=5 {
            window.record(latency as f64, true, 0);
        }

        assert_eq!(window.len(), 3);
        let latencies: Vec<f64> = window.samples().iter().map(|s| s.latency).collect();
        assert_eq!(latencies, vec![3.0, 4.0, 5.0]);

        // Lifetime counters are not evicted
        assert_eq!(window.request_count(), 5);
    }

    #[test]
    fn test_error_rate_is_lifetime() {
        let window = MetricsWindow::new(2);
        window.record(1.0, false, 0);
        window.record(1.0, true, 0);
        window.record(1.0, true, 0);
        window.record(1.0, true, 0);

        // The failing sample is gone from the window but still counted
        assert!(window.samples().iter().all(|s| s.success));
        assert_eq!(window.error_count(), 1);
        assert!((window.error_rate() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_token_total_survives_eviction() {
        let window = MetricsWindow::new(1);
        window.record(1.0, true, 10);
        window.record(1.0, true, 5);

        let stats = window.stats();
        assert_eq!(window.len(), 1);
        assert_eq!(stats.total_tokens, 15);
    }

    #[test]
    fn test_throughput() {
        let window = MetricsWindow::new(10);
        window.record(2.0, true, 100);
        window.record(2.0, true, 100);
        assert!((window.throughput() - 50.0).abs() < 1e-9);

        // Sub-second total latency is floored at one second
        let fast = MetricsWindow::new(10);
        fast.record(0.1, true, 30);
        assert!((fast.throughput() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_latency_is_clamped() {
        let window = MetricsWindow::new(10);
        window.record(-1.0, true, 0);
        window.record(f64::NAN, true, 0);
        assert!(window.samples().iter().all(|s| s.latency == 0.0));
    }

    #[test]
    fn test_concurrent_record_keeps_invariants() {
        let window = Arc::new(MetricsWindow::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let window = Arc::clone(&window);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        window.record(i as f64 * 0.01, (i + t) % 3 != 0, 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = window.stats();
        assert_eq!(window.len(), 50);
        assert_eq!(stats.request_count, 1600);
        assert!(stats.error_count <= stats.request_count);
    }
}
