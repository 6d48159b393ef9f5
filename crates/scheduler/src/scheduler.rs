//! # Ingestion Scheduler
//!
//! Cooperative dispatch loop over the [`IngestionQueue`]: a
//! `tokio::sync::Semaphore` with `max_concurrent` permits bounds how many
//! items are processing, and each permit drives one analyzer call.
//!
//! ## Processing
//!
//! ```text
//! dispatch()
//!   while permit available && pending item exists:
//!     dequeue (→ processing) ─▶ spawn process(item, permit)
//!
//! process(item)
//!   analyzer.analyze(target)   (bounded by analyzer_timeout_ms)
//!     ├── Ok(report) ─▶ ledger.submit(event) ─▶ Completed
//!     └── Err(reason) ─▶ retry_count < max ? Pending : Failed
//! ```
//!
//! ## Loop
//!
//! [`IngestionScheduler::start`] runs two independent intervals, one for
//! dispatch and one for reporting, until the shutdown `Notify` fires.
//! Reporting never mutates an item, node or harvester.
//!
//! ## Locking
//!
//! The queue mutex is held only for synchronous bookkeeping, never across
//! the analyzer await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use harvest_common::{now_ms, HarvestError, Priority, SchedulerConfig};
use harvest_ledger::{OptimizationEvent, OptimizationLedger};

use crate::analyzer::{AnalysisReport, Analyzer};
use crate::queue::{IngestionQueue, ItemStatus, QueueItem, QueueStatus};
use crate::report::{recommendations, SchedulerNotification, SchedulerReport, Thresholds};

pub struct IngestionScheduler {
    config: SchedulerConfig,
    analyzer: Arc<dyn Analyzer>,
    ledger: Arc<OptimizationLedger>,
    queue: Mutex<IngestionQueue>,
    permits: Arc<Semaphore>,
    /// Signalled each time an item leaves `processing`.
    settled: Notify,
    notifications: broadcast::Sender<SchedulerNotification>,
    /// Last timestamp stamped on a ledger event; strictly increasing.
    last_event_ms: AtomicU64,
}

impl IngestionScheduler {
    pub fn new(
        config: SchedulerConfig,
        analyzer: Arc<dyn Analyzer>,
        ledger: Arc<OptimizationLedger>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            queue: Mutex::new(IngestionQueue::new(config.max_retries)),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            settled: Notify::new(),
            notifications,
            last_event_ms: AtomicU64::new(0),
            config,
            analyzer,
            ledger,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<OptimizationLedger> {
        &self.ledger
    }

    /// Receive completion, retry, failure and report notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerNotification> {
        self.notifications.subscribe()
    }

    fn notify(&self, notification: SchedulerNotification) {
        // No receivers is fine.
        let _ = self.notifications.send(notification);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queue operations
    // ────────────────────────────────────────────────────────────────────────

    /// Add a target to the queue. Always succeeds.
    pub fn enqueue(
        &self,
        target: impl Into<String>,
        priority: Priority,
        category: Option<String>,
    ) -> String {
        let target = target.into();
        let id = self
            .queue
            .lock()
            .enqueue(target.clone(), priority, category, now_ms());
        debug!("enqueued {} ({}) as {}", target, priority, id);
        id
    }

    /// Take the highest-priority pending item, FIFO within its tier, and
    /// mark it processing.
    ///
    /// The caller owns the item until it is handed to
    /// [`process`](Self::process).
    pub fn dequeue_next(&self) -> Option<QueueItem> {
        self.queue.lock().dequeue_next()
    }

    /// Start as many items as free permits allow. Returns how many started.
    ///
    /// # Panics
    ///
    /// Spawns onto the current tokio runtime, so it panics when called
    /// outside one.
    pub fn dispatch(self: &Arc<Self>) -> usize {
        let mut started = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some(item) = self.dequeue_next() else {
                break;
            };
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.run_with_permit(item, permit).await });
            started += 1;
        }
        if started > 0 {
            debug!("dispatched {} items", started);
        }
        started
    }

    async fn run_with_permit(&self, item: QueueItem, permit: OwnedSemaphorePermit) {
        self.process(item).await;
        drop(permit);
        self.settled.notify_one();
    }

    /// Analyze a processing item and settle it.
    pub async fn process(&self, item: QueueItem) {
        match self.analyze(&item.target).await {
            Ok(report) => self.settle_success(&item, report),
            Err(reason) => self.settle_failure(&item, reason),
        }
    }

    async fn analyze(&self, target: &str) -> Result<AnalysisReport, String> {
        let analyzer = Arc::clone(&self.analyzer);
        let owned = target.to_string();
        let call = tokio::spawn(async move { analyzer.analyze(&owned).await });
        let abort = call.abort_handle();

        let joined = match self.config.analyzer_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), call).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(format!("analyzer timed out after {}ms", ms));
                }
            },
            None => call.await,
        };
        match joined {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("analyzer task aborted: {}", e)),
        }
    }

    /// Wall clock in ms, bumped past the previous stamp so two settlements
    /// of the same target never share a fingerprint.
    fn next_event_ms(&self) -> u64 {
        let now = now_ms();
        let prev = self
            .last_event_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(prev.saturating_add(1))
    }

    fn settle_success(&self, item: &QueueItem, report: AnalysisReport) {
        let mut event = OptimizationEvent::new(
            item.target.clone(),
            report.bytes_saved,
            self.config.harvester_address.clone(),
            self.next_event_ms(),
        )
        .with_tags(report.category_tags.iter().cloned());
        event.category = item.category.clone();

        let submission = self.ledger.submit(event);
        if let Err(e) = &submission {
            warn!("ledger rejected event for {}: {}", item.id, e);
        }
        let fingerprint = submission.as_ref().ok().map(|r| r.fingerprint.clone());

        if self
            .queue
            .lock()
            .complete(&item.id, report, submission, now_ms())
            .is_some()
        {
            info!("item {} completed ({})", item.id, item.target);
            self.notify(SchedulerNotification::Completed {
                item_id: item.id.clone(),
                fingerprint,
            });
        }
    }

    fn settle_failure(&self, item: &QueueItem, reason: String) {
        let outcome = self.queue.lock().fail(&item.id, reason, now_ms());
        match outcome {
            Some(HarvestError::TransientTask {
                item_id,
                attempt,
                reason,
            }) => {
                warn!(
                    "item {} failed on attempt {}, will retry: {}",
                    item_id, attempt, reason
                );
                self.notify(SchedulerNotification::Retrying {
                    item_id,
                    attempt,
                    reason,
                });
            }
            Some(HarvestError::TerminalTask {
                item_id,
                attempts,
                reason,
            }) => {
                error!(
                    "item {} failed permanently after {} attempts: {}",
                    item_id, attempts, reason
                );
                self.notify(SchedulerNotification::Failed {
                    item_id,
                    attempts,
                    reason,
                });
            }
            Some(other) => warn!("unexpected settle outcome for {}: {}", item.id, other),
            None => debug!("item {} was not processing when it failed", item.id),
        }
    }

    /// Dispatch repeatedly until nothing is pending or processing.
    pub async fn drain(self: &Arc<Self>) {
        loop {
            self.dispatch();
            if self.queue.lock().is_idle() {
                return;
            }
            self.settled.notified().await;
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Loop
    // ────────────────────────────────────────────────────────────────────────

    /// Spawn the dispatch and reporting loop.
    pub fn start(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut process_tick =
                interval(Duration::from_millis(scheduler.config.process_interval_ms.max(1)));
            let mut stats_tick =
                interval(Duration::from_millis(scheduler.config.stats_interval_ms.max(1)));
            process_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let stop = shutdown.notified();
            tokio::pin!(stop);

            info!(
                "scheduler started: max_concurrent {}, tick {}ms, stats every {}ms",
                scheduler.config.max_concurrent,
                scheduler.config.process_interval_ms,
                scheduler.config.stats_interval_ms
            );
            loop {
                tokio::select! {
                    _ = &mut stop => {
                        info!("scheduler shutting down");
                        break;
                    }
                    _ = process_tick.tick() => {
                        scheduler.dispatch();
                    }
                    _ = stats_tick.tick() => {
                        scheduler.emit_report();
                    }
                }
            }
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Reporting
    // ────────────────────────────────────────────────────────────────────────

    pub fn report(&self) -> SchedulerReport {
        let (queue, pending_by_priority) = {
            let q = self.queue.lock();
            (q.status(), q.pending_by_priority())
        };
        let storage_utilization = self.ledger.registry().system_stats().storage_utilization;
        let thresholds = Thresholds {
            utilization_low: self.config.utilization_low_watermark,
            backlog_high: self.config.backlog_high_watermark,
        };
        SchedulerReport {
            generated_at: now_ms(),
            recommendations: recommendations(&thresholds, &queue, storage_utilization),
            queue,
            pending_by_priority,
            storage_utilization,
            network_efficiency: self.ledger.network_efficiency(),
        }
    }

    /// Build a report, log it and broadcast it.
    pub fn emit_report(&self) -> SchedulerReport {
        let report = self.report();
        info!(
            "queue: {} pending ({} high / {} medium / {} low), {} processing, {} completed, {} failed; efficiency {:.1}",
            report.queue.pending,
            report.pending_by_priority.high,
            report.pending_by_priority.medium,
            report.pending_by_priority.low,
            report.queue.processing,
            report.queue.completed,
            report.queue.failed,
            report.network_efficiency
        );
        for rec in &report.recommendations {
            info!("recommendation: {}", rec);
        }
        self.notify(SchedulerNotification::Report(report.clone()));
        report
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────────

    pub fn get_item(&self, item_id: &str) -> Option<QueueItem> {
        self.queue.lock().get(item_id).cloned()
    }

    /// Every item in enqueue order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.queue.lock().items()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.lock().status()
    }

    pub fn failed_items(&self) -> Vec<QueueItem> {
        self.items()
            .into_iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .collect()
    }

    pub fn processing_count(&self) -> usize {
        self.queue.lock().status().processing
    }
}

impl std::fmt::Debug for IngestionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionScheduler")
            .field("queue", &self.queue_status())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
