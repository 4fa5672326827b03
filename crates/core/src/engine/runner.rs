//! Processing engine implementation.
//!
//! One cycle runs in two phases:
//! - Fetch: every handler is queried concurrently, results are truncated to the
//!   handler's limit and written into a queue bounded by the sum of all limits.
//! - Process: the queue is drained and every item runs in its own task against
//!   a freshly built handler instance.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{self, Envelope, PendingItem};
use super::{CycleReport, EngineConfig, EngineStatus, HandlerRegistry, Truncation};
use crate::metrics;

enum FetchOutcome {
    Items(Vec<PendingItem>),
    Failed(String),
    Cancelled,
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The processing engine - schedules fetch-then-process cycles across handlers.
pub struct ProcessingEngine {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,

    // Runtime state
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    last_cycle: Arc<RwLock<Option<(DateTime<Utc>, CycleReport)>>>,
    driver: Mutex<Option<Driver>>,
}

impl ProcessingEngine {
    /// Create a new engine over a frozen registry.
    pub fn new(registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            running: Arc::new(AtomicBool::new(false)),
            cycles: Arc::new(AtomicU64::new(0)),
            last_cycle: Arc::new(RwLock::new(None)),
            driver: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run a single cycle to completion.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let report = execute_cycle(&self.registry, cancel).await;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle.write().await = Some((Utc::now(), report.clone()));
        report
    }

    /// Start the hosting loop (spawns a background task).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return;
        }

        info!(
            handlers = self.registry.len(),
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting processing engine"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(hosting_loop(
            Arc::clone(&self.registry),
            Duration::from_millis(self.config.poll_interval_ms),
            cancel.clone(),
            Arc::clone(&self.cycles),
            Arc::clone(&self.last_cycle),
        ));

        *self.driver.lock().await = Some(Driver { cancel, handle });
    }

    /// Stop the hosting loop and wait for the current cycle to wind down.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Engine not running");
            return;
        }

        info!("Stopping processing engine");

        if let Some(driver) = self.driver.lock().await.take() {
            driver.cancel.cancel();
            if let Err(e) = driver.handle.await {
                error!("Engine hosting loop ended abnormally: {}", e);
            }
        }

        info!("Processing engine stopped");
    }

    /// Get current engine status.
    pub async fn status(&self) -> EngineStatus {
        let last = self.last_cycle.read().await.clone();
        EngineStatus {
            running: self.running.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            last_cycle_at: last.as_ref().map(|(at, _)| *at),
            last_report: last.map(|(_, report)| report),
            handlers: self.registry.infos(),
        }
    }
}

async fn hosting_loop(
    registry: Arc<HandlerRegistry>,
    interval: Duration,
    cancel: CancellationToken,
    cycles: Arc<AtomicU64>,
    last_cycle: Arc<RwLock<Option<(DateTime<Utc>, CycleReport)>>>,
) {
    info!("Engine hosting loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Engine hosting loop received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let task = tokio::spawn({
            let registry = Arc::clone(&registry);
            let cancel = cancel.clone();
            async move { execute_cycle(&registry, &cancel).await }
        });

        match task.await {
            Ok(report) => {
                cycles.fetch_add(1, Ordering::Relaxed);
                *last_cycle.write().await = Some((Utc::now(), report));
            }
            Err(e) => error!("Engine cycle aborted: {}", e),
        }
    }
    info!("Engine hosting loop stopped");
}

/// One fetch-then-process cycle. Never fails; faults are logged and reported.
async fn execute_cycle(registry: &HandlerRegistry, cancel: &CancellationToken) -> CycleReport {
    let mut report = CycleReport::default();
    if registry.is_empty() {
        debug!("No handlers registered, skipping cycle");
        return report;
    }

    let started = Instant::now();
    let (writer, mut reader) = queue::bounded(registry.total_capacity());

    let mut fetches = JoinSet::new();
    for entry in registry.entries() {
        let entry = entry.clone();
        let cancel = cancel.clone();
        fetches.spawn(async move {
            let limit = entry.info.max_items_per_cycle;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => FetchOutcome::Cancelled,
                result = AssertUnwindSafe(entry.source.fetch(limit, &cancel)).catch_unwind() => {
                    match result {
                        Ok(Ok(items)) => FetchOutcome::Items(items),
                        Ok(Err(e)) => FetchOutcome::Failed(e.to_string()),
                        Err(_) => FetchOutcome::Failed("fetch panicked".to_string()),
                    }
                }
            };
            (entry.name, limit, outcome)
        });
    }

    // This loop is the queue's only writer.
    while let Some(joined) = fetches.join_next().await {
        let (handler, limit, outcome) = match joined {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Fetch task aborted: {}", e);
                continue;
            }
        };

        let mut items = match outcome {
            FetchOutcome::Items(items) => items,
            FetchOutcome::Failed(message) => {
                warn!(handler = %handler, error = %message, "Handler fetch failed");
                metrics::FETCH_FAILURES.with_label_values(&[&*handler]).inc();
                report.fetch_failures.push(handler.to_string());
                continue;
            }
            FetchOutcome::Cancelled => {
                report.cancelled = true;
                continue;
            }
        };

        report.fetched += items.len();
        if items.len() > limit {
            warn!(
                handler = %handler,
                returned = items.len(),
                limit,
                "Handler returned more items than its per-cycle limit, truncating"
            );
            metrics::TRUNCATIONS.with_label_values(&[&*handler]).inc();
            report.truncations.push(Truncation {
                handler: handler.to_string(),
                returned: items.len(),
                limit,
            });
            items.truncate(limit);
        }

        for item in items {
            let envelope = Envelope::new(Arc::clone(&handler), item);
            if writer.send(envelope, cancel).await.is_err() {
                report.cancelled = true;
                break;
            }
        }
    }
    writer.close();

    let mut tasks = JoinSet::new();
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            next = reader.next() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let (handler, item_id, work) = envelope.into_parts(cancel.clone());
        metrics::ITEMS_DISPATCHED.with_label_values(&[&*handler]).inc();
        report.dispatched += 1;

        tasks.spawn(async move {
            let succeeded = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(handler = %handler, item_id = %item_id, "Work item processed");
                    true
                }
                Ok(Err(e)) => {
                    error!(handler = %handler, item_id = %item_id, error = %e, "Work item failed");
                    false
                }
                Err(_) => {
                    error!(handler = %handler, item_id = %item_id, "Work item panicked");
                    false
                }
            };
            metrics::ITEMS_PROCESSED
                .with_label_values(&[&*handler, if succeeded { "success" } else { "failure" }])
                .inc();
            succeeded
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => report.succeeded += 1,
            Ok(false) => report.failed += 1,
            Err(e) => {
                error!("Processing task aborted: {}", e);
                report.failed += 1;
            }
        }
    }

    let elapsed = started.elapsed();
    report.duration_ms = elapsed.as_millis() as u64;
    metrics::ENGINE_CYCLES.inc();
    metrics::ENGINE_CYCLE_DURATION.observe(elapsed.as_secs_f64());

    debug!(
        fetched = report.fetched,
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        failed = report.failed,
        fetch_failures = report.fetch_failures.len(),
        cancelled = report.cancelled,
        "Engine cycle finished"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Purpose;
    use crate::testing::MockWorkHandler;

    fn engine_with(mock: &MockWorkHandler, poll_interval_ms: u64) -> ProcessingEngine {
        let mut builder = HandlerRegistry::builder();
        builder.register("mock", 5, Purpose::Internal, mock.factory());
        let config = EngineConfig {
            poll_interval_ms,
            ..Default::default()
        };
        ProcessingEngine::new(builder.build().unwrap(), config)
    }

    #[tokio::test]
    async fn test_empty_registry_cycle_is_noop() {
        let engine = ProcessingEngine::new(
            HandlerRegistry::builder().build().unwrap(),
            EngineConfig::default(),
        );
        let report = engine.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_run_cycle_updates_status() {
        let mock = MockWorkHandler::new();
        mock.set_items(&["a", "b"]).await;
        let engine = engine_with(&mock, 10_000);

        let report = engine.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.succeeded, 2);

        let status = engine.status().await;
        assert!(!status.running);
        assert_eq!(status.cycles, 1);
        assert_eq!(status.last_report.unwrap().succeeded, 2);
        assert_eq!(status.handlers.len(), 1);
    }

    #[tokio::test]
    async fn test_start_runs_cycles_until_stopped() {
        let mock = MockWorkHandler::new();
        mock.set_items(&["a"]).await;
        let engine = engine_with(&mock, 10);

        engine.start().await;
        assert!(engine.status().await.running);

        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop().await;

        let status = engine.status().await;
        assert!(!status.running);
        assert!(status.cycles >= 1);
        assert!(mock.fetch_calls() >= 1);

        let cycles = status.cycles;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.cycles, cycles);
    }

    #[tokio::test]
    async fn test_item_panic_does_not_stop_loop() {
        let mock = MockWorkHandler::new();
        mock.set_items(&["boom"]).await;
        mock.panic_on_item("boom").await;
        let engine = engine_with(&mock, 10);

        engine.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop().await;

        let status = engine.status().await;
        assert!(status.cycles >= 2);
        assert_eq!(status.last_report.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_harmless() {
        let mock = MockWorkHandler::new();
        let engine = engine_with(&mock, 10);
        engine.stop().await;
        assert!(!engine.status().await.running);
    }
}
