//! Queue drain orchestration.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_common::{ApiError, OfflineConfig, Result};
use tether_net::{ConnectivityMonitor, RequestDescriptor, RequestExecutor};

use crate::batcher::{EventBatch, DEFAULT_TELEMETRY_TARGET};
use crate::queue::{OperationQueue, Status, WorkItem, WorkKind};

/// Summary of one drain.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Items accepted by the remote service.
    pub completed: usize,
    /// Items that exhausted their retry budget.
    pub failed: usize,
    /// Items left pending for a later drain (offline stop or
    /// remaining retry budget).
    pub deferred: usize,
    pub duration: Duration,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.deferred = other.deferred;
        self.duration += other.duration;
    }
}

/// Drains the durable operation queue when online.
///
/// `process_queue` is single-flight: overlapping triggers (timer,
/// connectivity event, manual force) collapse into one active drain,
/// and a trigger arriving mid-drain is coalesced into one follow-up
/// drain rather than dropped.
pub struct SyncEngine {
    queue: Arc<OperationQueue>,
    executor: Arc<RequestExecutor>,
    monitor: Arc<ConnectivityMonitor>,
    busy: AtomicBool,
    rerun: AtomicBool,
    batch_size: usize,
    poll_interval: Duration,
    telemetry_target: String,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create an engine over the queue and executor.
    pub fn new(
        queue: Arc<OperationQueue>,
        executor: Arc<RequestExecutor>,
        monitor: Arc<ConnectivityMonitor>,
        config: &OfflineConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            monitor,
            busy: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            batch_size: config.batch_size,
            poll_interval: config.sync_poll_interval(),
            telemetry_target: DEFAULT_TELEMETRY_TARGET.to_string(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Change the target telemetry work items are posted to.
    pub fn with_telemetry_target(mut self, target: impl Into<String>) -> Self {
        self.telemetry_target = target.into();
        self
    }

    /// Drain pending items in priority order.
    ///
    /// A concurrent call while a drain runs is a no-op that requests
    /// one more drain after the current one finishes.
    pub async fn process_queue(&self) -> Result<DrainReport> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            debug!("drain already running, coalescing trigger");
            return Ok(DrainReport::default());
        }

        let mut total = DrainReport::default();
        loop {
            match self.drain_once().await {
                Ok(report) => {
                    total.absorb(report);
                    if self.rerun.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    self.busy.store(false, Ordering::SeqCst);
                    // A trigger that raced with the release above would
                    // otherwise be stranded until the next timer tick.
                    if self.rerun.swap(false, Ordering::SeqCst)
                        && !self.busy.swap(true, Ordering::SeqCst)
                    {
                        continue;
                    }
                    return Ok(total);
                }
                Err(err) => {
                    self.busy.store(false, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }
    }

    /// Caller-requested drain.
    pub async fn force_sync(&self) -> Result<DrainReport> {
        self.process_queue().await
    }

    async fn drain_once(&self) -> Result<DrainReport> {
        let start = Instant::now();
        let mut report = DrainReport::default();
        let mut attempted: HashSet<Uuid> = HashSet::new();

        'drain: loop {
            let pending: Vec<WorkItem> = self
                .queue
                .peek_pending(self.batch_size)
                .await
                .into_iter()
                .filter(|item| !attempted.contains(&item.id))
                .collect();
            if pending.is_empty() {
                break;
            }

            for item in pending {
                // Partial progress is preserved: completed items stay
                // completed, the rest waits for the next trigger.
                if !self.monitor.current_state().await.is_online() {
                    debug!("offline mid-drain, rescheduling remaining items");
                    report.deferred = self.queue.pending_count().await;
                    break 'drain;
                }

                attempted.insert(item.id);
                self.queue.mark_in_flight(item.id).await?;

                match self.dispatch(&item).await {
                    Ok(()) => {
                        self.queue.mark_completed(item.id).await?;
                        report.completed += 1;
                    }
                    // Connectivity dropped while the item was in the
                    // executor. Not a dispatch failure: the item keeps
                    // its retry budget and waits for the next drain.
                    Err(ApiError::Offline) => {
                        debug!(id = %item.id, "offline during dispatch, deferring item");
                        self.queue.mark_deferred(item.id).await?;
                        report.deferred = self.queue.pending_count().await;
                        break 'drain;
                    }
                    Err(err) => {
                        warn!(id = %item.id, error = %err, "work item dispatch failed");
                        match self.queue.mark_failed(item.id, &err).await? {
                            Status::Failed => report.failed += 1,
                            _ => report.deferred += 1,
                        }
                    }
                }
            }
        }

        report.duration = start.elapsed();
        if report.completed + report.failed > 0 {
            info!(
                completed = report.completed,
                failed = report.failed,
                deferred = report.deferred,
                duration_ms = report.duration.as_millis() as u64,
                "queue drain finished"
            );
        }
        Ok(report)
    }

    async fn dispatch(&self, item: &WorkItem) -> Result<()> {
        match &item.kind {
            WorkKind::Mutation { request } => {
                self.executor.execute(request).await.map(|_| ())
            }
            WorkKind::FileTransfer { request, size } => {
                debug!(id = %item.id, size, "dispatching file transfer");
                self.executor.execute(request).await.map(|_| ())
            }
            WorkKind::Telemetry { events } => {
                let batch = EventBatch::new(events.clone());
                let request = RequestDescriptor::post(
                    self.telemetry_target.clone(),
                    serde_json::to_value(&batch)?,
                );
                self.executor.execute(&request).await.map(|_| ())
            }
        }
    }

    /// Start the trigger loop: connectivity-restored transitions and
    /// the coarse periodic timer.
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut conn_rx = engine.monitor.subscribe();
            let mut was_online = conn_rx.borrow().is_online();
            let mut ticker = tokio::time::interval(engine.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            debug!("sync engine started");

            // Anything left over from a previous process is drained
            // as soon as we are up and online.
            if was_online && engine.queue.has_pending().await {
                if let Err(err) = engine.process_queue().await {
                    warn!(error = %err, "startup drain failed");
                }
            }

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = engine.process_queue().await {
                            warn!(error = %err, "periodic drain failed");
                        }
                    }
                    changed = conn_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = conn_rx.borrow().is_online();
                        if online && !was_online {
                            info!("connectivity restored, draining queue");
                            if let Err(err) = engine.process_queue().await {
                                warn!(error = %err, "reconnect drain failed");
                            }
                        }
                        was_online = online;
                    }
                }
            }
            debug!("sync engine stopped");
        });

        if let Ok(mut task) = self.task.try_lock() {
            *task = Some(handle);
        }
    }

    /// Stop the trigger loop and release its timer.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
