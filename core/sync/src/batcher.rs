//! Telemetry event batching with offline fallback storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_common::{OfflineConfig, Result};
use tether_net::{ConnectivityMonitor, RequestDescriptor, RequestExecutor};
use tether_storage::{KvStore, OFFLINE_EVENTS_KEY};

/// Default target the event batch is posted to.
pub const DEFAULT_TELEMETRY_TARGET: &str = "events/batch";

/// One telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl TelemetryEvent {
    /// New event stamped with the current time.
    pub fn new(name: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            properties,
            occurred_at: Utc::now(),
        }
    }
}

/// Transient envelope assembled at flush time; discarded after a
/// successful send or re-merged into offline storage on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub batch_id: Uuid,
    pub events: Vec<TelemetryEvent>,
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    /// Wrap events in a new batch envelope.
    pub fn new(events: Vec<TelemetryEvent>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            events,
            created_at: Utc::now(),
        }
    }
}

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing buffered; no network I/O performed.
    Empty,
    /// Another flush was in progress; this one was a no-op.
    AlreadyRunning,
    /// Batch accepted by the remote service.
    Sent(usize),
    /// Offline or send failed; events persisted for the next trigger.
    Deferred(usize),
}

/// Buffers high-frequency telemetry and ships it in bulk.
///
/// Flushes are triggered by buffer size, a periodic timer, and the
/// connectivity-restored signal. When a flush cannot reach the remote
/// service the events go to a bounded offline list (oldest dropped past
/// the cap) and are retried on the next trigger. The persisted copy is
/// removed only after the remote accepts a batch, so a crash mid-flush
/// re-sends events rather than losing them, bounded by the cap.
pub struct EventBatcher {
    store: Arc<dyn KvStore>,
    executor: Arc<RequestExecutor>,
    monitor: Arc<ConnectivityMonitor>,
    buffer: Mutex<Vec<TelemetryEvent>>,
    flushing: AtomicBool,
    batch_size: usize,
    max_offline_events: usize,
    flush_interval: Duration,
    target: String,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBatcher {
    /// Create a batcher over previously persisted state.
    ///
    /// Events persisted by a previous process stay in durable storage
    /// until a flush delivers them; startup only counts them.
    pub async fn load(
        store: Arc<dyn KvStore>,
        executor: Arc<RequestExecutor>,
        monitor: Arc<ConnectivityMonitor>,
        config: &OfflineConfig,
    ) -> Result<Self> {
        let batcher = Self {
            store,
            executor,
            monitor,
            buffer: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
            batch_size: config.batch_size,
            max_offline_events: config.max_offline_events,
            flush_interval: config.flush_interval(),
            target: DEFAULT_TELEMETRY_TARGET.to_string(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        };

        let persisted = batcher.peek_persisted().await?;
        if !persisted.is_empty() {
            debug!(count = persisted.len(), "found persisted offline events");
        }

        Ok(batcher)
    }

    /// Change the flush target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Append an event to the buffer; flushes when the size threshold
    /// is reached.
    pub async fn record(&self, event: TelemetryEvent) -> Result<()> {
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= self.batch_size
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Number of buffered events.
    pub async fn buffered_count(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Assemble and send everything buffered (plus anything persisted
    /// offline earlier).
    ///
    /// Single-flight: a flush arriving while one runs is a no-op.
    /// Network failure is not an error here; the events are persisted
    /// and the outcome says so.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return Ok(FlushOutcome::AlreadyRunning);
        }
        let result = self.flush_inner().await;
        self.flushing.store(false, Ordering::SeqCst);
        result
    }

    async fn flush_inner(&self) -> Result<FlushOutcome> {
        // Persisted backlog goes first so ordering is oldest-first.
        // The durable copy is left in place until the remote accepts
        // the batch; a crash between here and then re-sends instead of
        // losing events.
        let persisted = self.peek_persisted().await?;
        let drained: Vec<TelemetryEvent> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };

        if persisted.is_empty() && drained.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let mut events = persisted;
        events.extend(drained.iter().cloned());
        let count = events.len();

        if !self.monitor.current_state().await.is_online() {
            if let Err(err) = self.persist_all(events).await {
                self.restore_buffer(drained).await;
                return Err(err);
            }
            debug!(count, "offline, deferred event batch");
            return Ok(FlushOutcome::Deferred(count));
        }

        let batch = EventBatch::new(events);
        let request =
            RequestDescriptor::post(self.target.clone(), serde_json::to_value(&batch)?);

        match self.executor.execute(&request).await {
            Ok(_) => {
                info!(count, batch_id = %batch.batch_id, "event batch sent");
                if let Err(err) = self.store.remove(OFFLINE_EVENTS_KEY).await {
                    // The batch was delivered; stale entries re-send
                    // later and the remote deduplicates on event id.
                    warn!(error = %err, "failed to clear delivered offline events");
                }
                Ok(FlushOutcome::Sent(count))
            }
            Err(err) => {
                warn!(error = %err, count, "event batch send failed, persisting");
                if let Err(persist_err) = self.persist_all(batch.events).await {
                    self.restore_buffer(drained).await;
                    return Err(persist_err);
                }
                Ok(FlushOutcome::Deferred(count))
            }
        }
    }

    /// Read the persisted offline list, leaving it in place.
    async fn peek_persisted(&self) -> Result<Vec<TelemetryEvent>> {
        match self.store.get(OFFLINE_EVENTS_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the persisted offline list, keeping the most recent
    /// entries when the cap is exceeded.
    async fn persist_all(&self, mut events: Vec<TelemetryEvent>) -> Result<()> {
        if events.len() > self.max_offline_events {
            let excess = events.len() - self.max_offline_events;
            events.drain(..excess);
            warn!(dropped = excess, cap = self.max_offline_events, "offline event cap exceeded");
        }

        let json = serde_json::to_vec(&events)?;
        self.store.set(OFFLINE_EVENTS_KEY, json).await
    }

    /// Put drained events back at the front of the buffer after a
    /// failed persistence attempt, so nothing is silently dropped.
    async fn restore_buffer(&self, mut drained: Vec<TelemetryEvent>) {
        let mut buffer = self.buffer.lock().await;
        drained.append(&mut buffer);
        *buffer = drained;
    }

    /// Start the periodic flush timer and the connectivity-restored
    /// trigger.
    pub fn start(self: &Arc<Self>) {
        let batcher = Arc::clone(self);
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(batcher.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick

            let mut conn_rx = batcher.monitor.subscribe();
            let mut was_online = conn_rx.borrow().is_online();
            debug!("event batcher started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = batcher.flush().await {
                            warn!(error = %err, "periodic flush failed");
                        }
                    }
                    changed = conn_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = conn_rx.borrow().is_online();
                        if online && !was_online {
                            debug!("connectivity restored, flushing events");
                            if let Err(err) = batcher.flush().await {
                                warn!(error = %err, "reconnect flush failed");
                            }
                        }
                        was_online = online;
                    }
                }
            }
            debug!("event batcher stopped");
        });

        if let Ok(mut task) = self.task.try_lock() {
            *task = Some(handle);
        }
    }

    /// Stop the background task, attempting one final flush.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Err(err) = self.flush().await {
            warn!(error = %err, "final flush on stop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fast_config, online_monitor, scripted_executor, ScriptedTransport};
    use serde_json::json;
    use tether_common::ApiError;
    use tether_storage::MemoryStore;

    async fn batcher_with(
        store: Arc<dyn KvStore>,
        transport: Arc<ScriptedTransport>,
        monitor: Arc<ConnectivityMonitor>,
        config: &OfflineConfig,
    ) -> EventBatcher {
        let executor = scripted_executor(transport, monitor.clone(), config);
        EventBatcher::load(store, executor, monitor, config)
            .await
            .unwrap()
    }

    fn event(name: &str) -> TelemetryEvent {
        TelemetryEvent::new(name, json!({"screen": "home"}))
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let transport = Arc::new(ScriptedTransport::ok());
        let batcher = batcher_with(
            Arc::new(MemoryStore::new()),
            transport.clone(),
            online_monitor(),
            &fast_config(),
        )
        .await;

        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Empty);
        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Empty);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_double_flush_sends_one_batch() {
        let transport = Arc::new(ScriptedTransport::ok());
        let batcher = batcher_with(
            Arc::new(MemoryStore::new()),
            transport.clone(),
            online_monitor(),
            &fast_config(),
        )
        .await;

        batcher.record(event("tap")).await.unwrap();

        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Sent(1));
        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Empty);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_flush() {
        let transport = Arc::new(ScriptedTransport::ok());
        let config = fast_config().with_batch_size(3);
        let batcher = batcher_with(
            Arc::new(MemoryStore::new()),
            transport.clone(),
            online_monitor(),
            &config,
        )
        .await;

        batcher.record(event("a")).await.unwrap();
        batcher.record(event("b")).await.unwrap();
        assert_eq!(transport.calls(), 0);

        batcher.record(event("c")).await.unwrap();
        assert_eq!(transport.calls(), 1);
        assert_eq!(batcher.buffered_count().await, 0);
    }

    #[tokio::test]
    async fn test_offline_flush_persists_events() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::ok());
        let monitor = online_monitor();
        monitor.set_state(false, false).await;

        let batcher =
            batcher_with(store.clone(), transport.clone(), monitor, &fast_config()).await;

        batcher.record(event("a")).await.unwrap();
        batcher.record(event("b")).await.unwrap();

        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Deferred(2));
        assert_eq!(transport.calls(), 0);

        let persisted: Vec<TelemetryEvent> =
            serde_json::from_slice(&store.get(OFFLINE_EVENTS_KEY).await.unwrap().unwrap())
                .unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_offline_event_cap_keeps_most_recent() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::ok());
        let monitor = online_monitor();
        monitor.set_state(false, false).await;

        let config = fast_config().with_max_offline_events(5).with_batch_size(100);
        let batcher = batcher_with(store.clone(), transport, monitor, &config).await;

        for i in 0..8 {
            batcher.record(event(&format!("e{}", i))).await.unwrap();
        }
        batcher.flush().await.unwrap();

        let persisted: Vec<TelemetryEvent> =
            serde_json::from_slice(&store.get(OFFLINE_EVENTS_KEY).await.unwrap().unwrap())
                .unwrap();
        let names: Vec<&str> = persisted.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["e3", "e4", "e5", "e6", "e7"]);
    }

    #[tokio::test]
    async fn test_send_failure_defers_then_retries() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::script(vec![
            Err(ApiError::from_status(422, "schema mismatch")),
        ]));
        let batcher = batcher_with(
            store.clone(),
            transport.clone(),
            online_monitor(),
            &fast_config(),
        )
        .await;

        batcher.record(event("a")).await.unwrap();
        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Deferred(1));

        // The durable copy is retained while delivery is outstanding.
        assert!(store.get(OFFLINE_EVENTS_KEY).await.unwrap().is_some());

        // Next flush picks the persisted event back up and succeeds.
        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Sent(1));
        assert!(store.get(OFFLINE_EVENTS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persisted_events_flushed_after_restart() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let monitor = online_monitor();
        monitor.set_state(false, false).await;

        // First life: events stranded offline.
        {
            let batcher = batcher_with(
                store.clone(),
                Arc::new(ScriptedTransport::ok()),
                monitor,
                &fast_config(),
            )
            .await;
            batcher.record(event("stranded")).await.unwrap();
            batcher.flush().await.unwrap();
        }

        // Second life: the durable copy stays in storage until a flush
        // delivers it, so a crash before that flush loses nothing.
        let transport = Arc::new(ScriptedTransport::ok());
        let batcher = batcher_with(
            store.clone(),
            transport.clone(),
            online_monitor(),
            &fast_config(),
        )
        .await;
        assert!(store.get(OFFLINE_EVENTS_KEY).await.unwrap().is_some());

        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Sent(1));
        assert_eq!(transport.calls(), 1);
        assert!(store.get(OFFLINE_EVENTS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persisted_and_buffered_events_flush_oldest_first() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let monitor = online_monitor();
        monitor.set_state(false, false).await;

        {
            let batcher = batcher_with(
                store.clone(),
                Arc::new(ScriptedTransport::ok()),
                monitor,
                &fast_config(),
            )
            .await;
            batcher.record(event("old")).await.unwrap();
            batcher.flush().await.unwrap();
        }

        let transport = Arc::new(ScriptedTransport::ok());
        let batcher = batcher_with(
            store.clone(),
            transport.clone(),
            online_monitor(),
            &fast_config(),
        )
        .await;
        batcher.record(event("new")).await.unwrap();

        assert_eq!(batcher.flush().await.unwrap(), FlushOutcome::Sent(2));
        let bodies = transport.bodies();
        let events = bodies[0].as_ref().unwrap()["events"].as_array().unwrap().clone();
        assert_eq!(events[0]["name"], "old");
        assert_eq!(events[1]["name"], "new");
    }

    #[tokio::test]
    async fn test_batch_envelope_shape() {
        let transport = Arc::new(ScriptedTransport::ok());
        let batcher = batcher_with(
            Arc::new(MemoryStore::new()),
            transport.clone(),
            online_monitor(),
            &fast_config(),
        )
        .await;

        batcher.record(event("tap")).await.unwrap();
        batcher.flush().await.unwrap();

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        let body = bodies[0].as_ref().unwrap();
        assert!(body.get("batch_id").is_some());
        assert_eq!(body["events"].as_array().unwrap().len(), 1);
        assert_eq!(body["events"][0]["name"], "tap");
    }
}
