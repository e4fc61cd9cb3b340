//! In-process engine double

use crate::engine::{AcceleratorReading, EngineProbe, EngineStatus, Generation};
use crate::{MonitorError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Scriptable engine for development and tests.
///
/// Probes return the configured status unless a failure is injected.
/// Optional delays are served with `tokio::time::sleep`, so paused-time
/// tests control them exactly.
pub struct MockEngine {
    status: Mutex<EngineStatus>,
    probe_failure: Mutex<Option<String>>,
    generate_failure: Mutex<Option<String>>,
    generation: Mutex<Generation>,
    probe_delay: Duration,
    generate_delay: Duration,
    probes_started: AtomicU64,
    probes_completed: AtomicU64,
    generate_calls: AtomicU64,
}

impl MockEngine {
    /// A ready engine
    pub fn new() -> Self {
        Self::with_status(EngineStatus::ready())
    }

    /// An engine that is still loading its model
    pub fn loading() -> Self {
        Self::with_status(EngineStatus::loading())
    }

    pub fn with_status(status: EngineStatus) -> Self {
        Self {
            status: Mutex::new(status),
            probe_failure: Mutex::new(None),
            generate_failure: Mutex::new(None),
            generation: Mutex::new(Generation {
                text: "Hello from the mock engine".to_string(),
                tokens_generated: 6,
            }),
            probe_delay: Duration::ZERO,
            generate_delay: Duration::ZERO,
            probes_started: AtomicU64::new(0),
            probes_completed: AtomicU64::new(0),
            generate_calls: AtomicU64::new(0),
        }
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    pub fn with_accelerator(self, reading: AcceleratorReading) -> Self {
        self.status.lock().accelerator = Some(reading);
        self
    }

    pub fn set_status(&self, status: EngineStatus) {
        *self.status.lock() = status;
    }

    /// Make subsequent probes fail with `reason`, or succeed again with `None`
    pub fn set_probe_failure(&self, reason: Option<&str>) {
        *self.probe_failure.lock() = reason.map(str::to_string);
    }

    pub fn set_generate_failure(&self, reason: Option<&str>) {
        *self.generate_failure.lock() = reason.map(str::to_string);
    }

    pub fn set_generation(&self, text: &str, tokens_generated: u64) {
        *self.generation.lock() = Generation {
            text: text.to_string(),
            tokens_generated,
        };
    }

    pub fn probes_started(&self) -> u64 {
        self.probes_started.load(Ordering::SeqCst)
    }

    pub fn probes_completed(&self) -> u64 {
        self.probes_completed.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> u64 {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineProbe for MockEngine {
    async fn probe(&self) -> Result<EngineStatus> {
        self.probes_started.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }

        let result = match self.probe_failure.lock().clone() {
            Some(reason) => Err(MonitorError::Probe(reason)),
            None => Ok(self.status.lock().clone()),
        };

        self.probes_completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<Generation> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }

        if let Some(reason) = self.generate_failure.lock().clone() {
            return Err(MonitorError::Engine(reason));
        }

        Ok(self.generation.lock().clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_probe_and_failure_injection() {
        let engine = MockEngine::new();
        assert!(engine.probe().await.unwrap().initialized);

        engine.set_probe_failure(Some("boom"));
        assert!(matches!(engine.probe().await, Err(MonitorError::Probe(_))));

        engine.set_probe_failure(None);
        assert!(engine.probe().await.is_ok());
        assert_eq!(engine.probes_started(), 3);
        assert_eq!(engine.probes_completed(), 3);
    }

    #[tokio::test]
    async fn test_mock_generation() {
        let engine = MockEngine::loading();
        assert!(!engine.probe().await.unwrap().initialized);

        engine.set_generation("ok", 1);
        let generation = engine.generate("ping", 5).await.unwrap();
        assert_eq!(generation.text, "ok");

        engine.set_generate_failure(Some("out of memory"));
        assert!(engine.generate("ping", 5).await.is_err());
        assert_eq!(engine.generate_calls(), 2);
    }
}
