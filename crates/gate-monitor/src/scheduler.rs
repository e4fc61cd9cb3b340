//! Background monitoring loop

use crate::checker::HealthChecker;
use crate::engine::EngineProbe;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    interval: Duration,
    started_at: DateTime<Utc>,
}

/// Runs at most one periodic health check loop.
///
/// `start` is idempotent while a loop is running. `stop` cancels the sleep
/// between ticks immediately but lets an in-flight probe finish, then waits
/// for the loop task to exit.
pub struct MonitoringScheduler {
    checker: Arc<HealthChecker>,
    running: Mutex<Option<RunningLoop>>,
}

impl MonitoringScheduler {
    pub fn new(checker: Arc<HealthChecker>) -> Self {
        Self {
            checker,
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop. Returns `false` if one is already running.
    pub async fn start(&self, engine: Arc<dyn EngineProbe>, interval: Duration) -> bool {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                warn!(
                    interval_seconds = current.interval.as_secs(),
                    "Monitoring is already running"
                );
                return false;
            }
            error!("Previous monitoring loop exited unexpectedly, restarting");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let checker = Arc::clone(&self.checker);
        let handle = tokio::spawn(run_loop(checker, engine, interval, shutdown_rx));

        *running = Some(RunningLoop {
            shutdown_tx,
            handle,
            interval,
            started_at: Utc::now(),
        });

        info!(interval_seconds = interval.as_secs(), "Started health monitoring");
        true
    }

    /// Cancel the loop and wait for it to exit. No-op when stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;

        let Some(current) = running.take() else {
            debug!("Monitoring is not running");
            return;
        };

        let _ = current.shutdown_tx.send(true);
        if let Err(e) = current.handle.await {
            error!(error = %e, "Monitoring loop terminated abnormally");
        }

        info!("Stopped health monitoring");
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|current| !current.handle.is_finished())
            .unwrap_or(false)
    }

    /// Interval and start time of the running loop
    pub async fn current_schedule(&self) -> Option<(Duration, DateTime<Utc>)> {
        self.running
            .lock()
            .await
            .as_ref()
            .filter(|current| !current.handle.is_finished())
            .map(|current| (current.interval, current.started_at))
    }
}

async fn run_loop(
    checker: Arc<HealthChecker>,
    engine: Arc<dyn EngineProbe>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(engine = engine.name(), "Monitoring loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Not raced against shutdown: an in-flight probe always completes.
        // Each tick runs in its own task so a panic costs one tick.
        let tick = tokio::spawn({
            let checker = Arc::clone(&checker);
            let engine = Arc::clone(&engine);
            async move {
                checker.perform_health_check(engine.as_ref()).await;
            }
        });
        if let Err(e) = tick.await {
            error!(error = %e, "Health check tick panicked");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Monitoring loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthState;
    use crate::history::HistoryStore;
    use crate::metrics::MetricsWindow;
    use crate::mock::MockEngine;
    use crate::resources::StaticResources;
    use gate_core::ThresholdConfig;
    use tokio::time::Instant;

    fn scheduler() -> (Arc<HealthChecker>, MonitoringScheduler) {
        let checker = Arc::new(HealthChecker::new(
            MetricsWindow::new(100),
            HistoryStore::new(100),
            ThresholdConfig::default(),
            Arc::new(StaticResources::default()),
        ));
        let scheduler = MonitoringScheduler::new(Arc::clone(&checker));
        (checker, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_runs_one_loop() {
        let (_, scheduler) = scheduler();
        let engine = Arc::new(MockEngine::new());

        assert!(scheduler.start(engine.clone(), Duration::from_secs(10)).await);
        assert!(!scheduler.start(engine.clone(), Duration::from_secs(10)).await);
        assert!(scheduler.is_running().await);

        // Ticks at t = 0, 10 and 20
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(engine.probes_started(), 3);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        assert_eq!(engine.probes_started(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_probe_finish() {
        let (checker, scheduler) = scheduler();
        let engine = Arc::new(MockEngine::new().with_probe_delay(Duration::from_secs(5)));

        scheduler.start(engine.clone(), Duration::from_secs(30)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.probes_started(), 1);
        assert_eq!(engine.probes_completed(), 0);

        scheduler.stop().await;

        assert_eq!(engine.probes_started(), 1);
        assert_eq!(engine.probes_completed(), 1);
        assert_eq!(checker.history().len(), 1);
        assert_eq!(checker.current().status, HealthState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_sleep_promptly() {
        let (_, scheduler) = scheduler();
        let engine = Arc::new(MockEngine::new());

        scheduler.start(engine.clone(), Duration::from_secs(300)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let before = Instant::now();
        scheduler.stop().await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.probes_started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failures_do_not_stop_loop() {
        let (checker, scheduler) = scheduler();
        let engine = Arc::new(MockEngine::new());
        engine.set_probe_failure(Some("engine down"));

        scheduler.start(engine.clone(), Duration::from_secs(10)).await;
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(checker.current().status, HealthState::Error);

        engine.set_probe_failure(None);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(checker.current().status, HealthState::Healthy);
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        assert_eq!(checker.checks_performed(), 3);
    }

    /// Panics on its first probe, then reports ready
    struct PanicOnce {
        probes: std::sync::atomic::AtomicU64,
    }

    #[async_trait::async_trait]
    impl EngineProbe for PanicOnce {
        async fn probe(&self) -> crate::Result<crate::EngineStatus> {
            if self.probes.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                panic!("probe blew up");
            }
            Ok(crate::EngineStatus::ready())
        }

        async fn generate(&self, _prompt: &str, _max_tokens: u32) -> crate::Result<crate::Generation> {
            Err(crate::MonitorError::Engine("not supported".to_string()))
        }

        fn name(&self) -> &str {
            "panic-once"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_check_costs_one_tick() {
        let (checker, scheduler) = scheduler();
        let engine = Arc::new(PanicOnce {
            probes: std::sync::atomic::AtomicU64::new(0),
        });

        scheduler.start(engine.clone(), Duration::from_secs(10)).await;
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert!(scheduler.is_running().await);
        assert_eq!(checker.checks_performed(), 1);
        assert_eq!(checker.current().status, HealthState::Healthy);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (_, scheduler) = scheduler();
        let engine = Arc::new(MockEngine::new());

        scheduler.stop().await;
        assert!(scheduler.start(engine.clone(), Duration::from_secs(10)).await);
        scheduler.stop().await;
        assert!(scheduler.start(engine.clone(), Duration::from_secs(20)).await);

        let (interval, _) = scheduler.current_schedule().await.unwrap();
        assert_eq!(interval, Duration::from_secs(20));
        scheduler.stop().await;
        assert!(scheduler.current_schedule().await.is_none());
    }
}
