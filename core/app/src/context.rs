//! Composition root wiring the offline stack together.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use tether_common::{ApiError, ErrorCode, OfflineConfig, Result};
use tether_net::{
    ConnectivityMonitor, ReachabilityProbe, RequestDescriptor, RequestExecutor, Response,
    SessionProvider, Transport,
};
use tether_storage::KvStore;
use tether_sync::{
    synthesize, DrainReport, EventBatcher, FlushOutcome, OperationQueue, OptimisticResponse,
    Priority, SyncEngine, TelemetryEvent, WorkItem, WorkKind,
};

/// What happened to a submitted request.
#[derive(Debug)]
pub enum Outcome {
    /// The request reached the remote service.
    Completed(Response),
    /// The request was accepted locally and queued for replay.
    Queued {
        item_id: Uuid,
        optimistic: Option<OptimisticResponse>,
    },
}

impl Outcome {
    /// Code carried by the deferred outcome; `None` for completions.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Queued { .. } => Some(ErrorCode::Queued),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Outcome::Queued { .. })
    }
}

/// Builder for [`OfflineContext`].
///
/// Every collaborator is injected; nothing here reaches for globals.
pub struct ContextBuilder {
    transport: Arc<dyn Transport>,
    sessions: Arc<dyn SessionProvider>,
    probe: Arc<dyn ReachabilityProbe>,
    store: Arc<dyn KvStore>,
    config: OfflineConfig,
    telemetry_target: Option<String>,
}

impl ContextBuilder {
    pub fn new(
        transport: Arc<dyn Transport>,
        sessions: Arc<dyn SessionProvider>,
        probe: Arc<dyn ReachabilityProbe>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            transport,
            sessions,
            probe,
            store,
            config: OfflineConfig::default(),
            telemetry_target: None,
        }
    }

    pub fn config(mut self, config: OfflineConfig) -> Self {
        self.config = config;
        self
    }

    /// Route telemetry batches to a non-default target.
    pub fn telemetry_target(mut self, target: impl Into<String>) -> Self {
        self.telemetry_target = Some(target.into());
        self
    }

    /// Wire the components and reload persisted state.
    pub async fn build(self) -> Result<OfflineContext> {
        let monitor = Arc::new(ConnectivityMonitor::new(
            self.probe,
            self.config.connectivity_poll(),
        ));
        let executor = Arc::new(RequestExecutor::new(
            self.transport,
            monitor.clone(),
            self.sessions,
            &self.config,
        ));
        let queue = Arc::new(OperationQueue::load(self.store.clone(), &self.config).await?);

        let mut engine = SyncEngine::new(
            queue.clone(),
            executor.clone(),
            monitor.clone(),
            &self.config,
        );
        let mut batcher = EventBatcher::load(
            self.store,
            executor.clone(),
            monitor.clone(),
            &self.config,
        )
        .await?;
        if let Some(target) = self.telemetry_target {
            engine = engine.with_telemetry_target(target.clone());
            batcher = batcher.with_target(target);
        }

        info!(
            pending = queue.pending_count().await,
            buffered = batcher.buffered_count().await,
            "offline context built"
        );

        Ok(OfflineContext {
            monitor,
            executor,
            queue,
            engine: Arc::new(engine),
            batcher: Arc::new(batcher),
        })
    }
}

/// Owns one instance of each offline component and exposes the
/// request entry point.
pub struct OfflineContext {
    monitor: Arc<ConnectivityMonitor>,
    executor: Arc<RequestExecutor>,
    queue: Arc<OperationQueue>,
    engine: Arc<SyncEngine>,
    batcher: Arc<EventBatcher>,
}

impl OfflineContext {
    pub fn builder(
        transport: Arc<dyn Transport>,
        sessions: Arc<dyn SessionProvider>,
        probe: Arc<dyn ReachabilityProbe>,
        store: Arc<dyn KvStore>,
    ) -> ContextBuilder {
        ContextBuilder::new(transport, sessions, probe, store)
    }

    /// Start the background loops: connectivity polling, queue
    /// draining, periodic telemetry flushes.
    pub fn start(&self) {
        self.monitor.start();
        self.engine.start();
        self.batcher.start();
    }

    /// Stop the background loops. Pending queue items stay persisted;
    /// buffered telemetry gets one final flush attempt.
    pub async fn shutdown(&self) {
        self.batcher.stop().await;
        self.engine.stop().await;
        self.monitor.stop().await;
        info!("offline context shut down");
    }

    /// Execute a request, or queue it when offline.
    ///
    /// Online requests go straight through the retrying executor.
    /// Offline mutations are accepted into the durable queue and
    /// answered with a locally synthesized result; offline reads fail
    /// immediately with [`ApiError::Offline`].
    pub async fn submit(&self, request: RequestDescriptor) -> Result<Outcome> {
        self.submit_with_priority(request, Priority::Normal).await
    }

    /// [`submit`](Self::submit) with an explicit queue priority for the
    /// offline path.
    pub async fn submit_with_priority(
        &self,
        request: RequestDescriptor,
        priority: Priority,
    ) -> Result<Outcome> {
        if self.monitor.current_state().await.is_online() {
            match self.executor.execute(&request).await {
                Ok(response) => return Ok(Outcome::Completed(response)),
                // Connectivity can drop between the check and the send.
                Err(ApiError::Offline) if request.method.is_mutation() => {}
                Err(err) => return Err(err),
            }
        } else if !request.method.is_mutation() {
            return Err(ApiError::Offline);
        }

        self.enqueue_mutation(request, priority).await
    }

    async fn enqueue_mutation(
        &self,
        mut request: RequestDescriptor,
        priority: Priority,
    ) -> Result<Outcome> {
        if request.idempotency_key.is_none() {
            request.idempotency_key = Some(Uuid::new_v4());
        }
        let optimistic = synthesize(&request);
        let item_id = self
            .queue
            .enqueue(WorkKind::Mutation { request }, priority)
            .await?;
        debug!(%item_id, "mutation queued for replay");
        Ok(Outcome::Queued {
            item_id,
            optimistic,
        })
    }

    /// Record a telemetry event through the batcher.
    pub async fn record_event(&self, event: TelemetryEvent) -> Result<()> {
        self.batcher.record(event).await
    }

    /// Flush buffered telemetry now.
    pub async fn flush_events(&self) -> Result<FlushOutcome> {
        self.batcher.flush().await
    }

    /// Drain the operation queue now.
    pub async fn force_sync(&self) -> Result<DrainReport> {
        self.engine.force_sync().await
    }

    /// Items that exhausted their retry budget and need a user decision.
    pub async fn failed_items(&self) -> Vec<WorkItem> {
        self.queue.failed_items().await
    }

    /// Give a failed item a fresh retry budget.
    pub async fn retry_failed(&self, item_id: Uuid) -> Result<()> {
        self.queue.retry_failed(item_id).await
    }

    /// Drop a failed item permanently.
    pub async fn discard(&self, item_id: Uuid) -> Result<()> {
        self.queue.discard(item_id).await
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.pending_count().await
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }
}
