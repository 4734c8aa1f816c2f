//! Durable operation queue for deferred work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use tether_common::{ApiError, OfflineConfig, Result};
use tether_net::RequestDescriptor;
use tether_storage::{KvStore, SYNC_QUEUE_KEY};

use crate::batcher::TelemetryEvent;

/// Priority tier; high drains before normal before low.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    /// Waiting to be dispatched.
    Pending,
    /// Currently being dispatched.
    InFlight,
    /// Retries exhausted; retained for caller-driven retry or dismissal.
    Failed,
    /// Remote accepted the work. Completed items are removed from the
    /// durable store and never re-dispatched.
    Completed,
}

/// What a work item does when replayed.
///
/// Exhaustively matched wherever items are processed, so adding a kind
/// is a compile-time-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkKind {
    /// A deferred remote mutation.
    Mutation { request: RequestDescriptor },
    /// A deferred file upload/download request.
    FileTransfer { request: RequestDescriptor, size: u64 },
    /// A batch of buffered telemetry events.
    #[serde(rename = "telemetryEvent")]
    Telemetry { events: Vec<TelemetryEvent> },
}

/// One unit of deferred work.
///
/// Delivery is at-least-once: a crash between remote success and local
/// removal replays the item, which is why mutations carry an
/// idempotency key the remote service deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: WorkKind,
    pub priority: Priority,
    pub status: Status,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkItem {
    /// New pending item.
    pub fn new(kind: WorkKind, priority: Priority, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            status: Status::Pending,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Persists deferred work across process restarts.
///
/// The persisted representation is the source of truth; the in-memory
/// list is a cache reloaded at startup, so a restart mid-queue never
/// silently drops pending work. Enqueue always succeeds locally and
/// never blocks on network I/O.
pub struct OperationQueue {
    store: Arc<dyn KvStore>,
    items: RwLock<Vec<WorkItem>>,
    default_max_retries: u32,
}

impl OperationQueue {
    /// Load the queue from storage.
    ///
    /// Items left `InFlight` by a crash are reset to `Pending` so they
    /// are re-dispatched.
    pub async fn load(store: Arc<dyn KvStore>, config: &OfflineConfig) -> Result<Self> {
        let mut items: Vec<WorkItem> = match store.get(SYNC_QUEUE_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };

        let mut recovered = 0;
        for item in &mut items {
            if item.status == Status::InFlight {
                item.status = Status::Pending;
                recovered += 1;
            }
        }
        if recovered > 0 {
            debug!(recovered, "reset in-flight items after restart");
        }

        let queue = Self {
            store,
            items: RwLock::new(items),
            default_max_retries: config.max_retries,
        };
        if recovered > 0 {
            let items = queue.items.read().await;
            queue.persist(&items).await?;
        }
        Ok(queue)
    }

    /// Append a new item and persist. Never touches the network.
    pub async fn enqueue(&self, kind: WorkKind, priority: Priority) -> Result<Uuid> {
        self.enqueue_with_retries(kind, priority, self.default_max_retries)
            .await
    }

    /// Append a new item with an explicit retry budget.
    pub async fn enqueue_with_retries(
        &self,
        kind: WorkKind,
        priority: Priority,
        max_retries: u32,
    ) -> Result<Uuid> {
        let item = WorkItem::new(kind, priority, max_retries);
        let id = item.id;

        let mut items = self.items.write().await;
        items.push(item);
        self.persist(&items).await?;

        debug!(%id, ?priority, "work item enqueued");
        Ok(id)
    }

    /// Pending items, ordered by priority tier then `created_at`
    /// ascending within a tier.
    ///
    /// The ordering is derived from persisted fields, so it is stable
    /// across restarts.
    pub async fn peek_pending(&self, limit: usize) -> Vec<WorkItem> {
        let items = self.items.read().await;
        let mut pending: Vec<WorkItem> = items
            .iter()
            .filter(|i| i.status == Status::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        pending
    }

    /// Transition an item to `InFlight`.
    pub async fn mark_in_flight(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ApiError::Storage(format!("work item not found: {}", id)))?;
        item.status = Status::InFlight;
        self.persist(&items).await
    }

    /// Remove a successfully dispatched item from the durable store.
    pub async fn mark_completed(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.write().await;
        items.retain(|i| i.id != id);
        self.persist(&items).await
    }

    /// Return an in-flight item to the pending pool without touching
    /// its retry budget.
    ///
    /// Used when dispatch was aborted by a connectivity drop rather
    /// than rejected; the item simply waits for the next drain.
    pub async fn mark_deferred(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ApiError::Storage(format!("work item not found: {}", id)))?;
        item.status = Status::Pending;
        self.persist(&items).await
    }

    /// Record a dispatch failure.
    ///
    /// Increments `retry_count` and re-queues the item while budget
    /// remains; otherwise leaves it in terminal `Failed` state, visible
    /// to the caller, never silently dropped. Returns the resulting
    /// status.
    pub async fn mark_failed(&self, id: Uuid, error: &ApiError) -> Result<Status> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ApiError::Storage(format!("work item not found: {}", id)))?;

        item.retry_count = (item.retry_count + 1).min(item.max_retries);
        item.last_error = Some(error.to_string());
        item.status = if item.retry_count < item.max_retries {
            Status::Pending
        } else {
            warn!(id = %item.id, retries = item.retry_count, "work item exhausted retries");
            Status::Failed
        };
        let status = item.status;

        self.persist(&items).await?;
        Ok(status)
    }

    /// Items in terminal `Failed` state, for surfacing to the caller.
    pub async fn failed_items(&self) -> Vec<WorkItem> {
        let items = self.items.read().await;
        items
            .iter()
            .filter(|i| i.status == Status::Failed)
            .cloned()
            .collect()
    }

    /// Caller-driven retry of a failed item: resets its budget and
    /// returns it to the pending pool.
    pub async fn retry_failed(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id && i.status == Status::Failed)
            .ok_or_else(|| ApiError::Storage(format!("no failed work item: {}", id)))?;
        item.status = Status::Pending;
        item.retry_count = 0;
        item.last_error = None;
        self.persist(&items).await
    }

    /// Caller-driven dismissal of an item.
    pub async fn discard(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.write().await;
        items.retain(|i| i.id != id);
        self.persist(&items).await
    }

    /// Number of pending items.
    pub async fn pending_count(&self) -> usize {
        let items = self.items.read().await;
        items.iter().filter(|i| i.status == Status::Pending).count()
    }

    /// Whether anything is pending.
    pub async fn has_pending(&self) -> bool {
        self.pending_count().await > 0
    }

    async fn persist(&self, items: &[WorkItem]) -> Result<()> {
        let json = serde_json::to_vec(items)?;
        self.store.set(SYNC_QUEUE_KEY, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_storage::MemoryStore;

    fn mutation(target: &str) -> WorkKind {
        WorkKind::Mutation {
            request: RequestDescriptor::post(target, json!({"v": 1})),
        }
    }

    async fn queue_with(store: Arc<dyn KvStore>) -> OperationQueue {
        OperationQueue::load(store, &OfflineConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_and_peek() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;

        let id = queue.enqueue(mutation("tasks"), Priority::Normal).await.unwrap();

        let pending = queue.peek_pending(10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].status, Status::Pending);
        assert_eq!(pending[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_priority_then_creation_order() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;

        let low = queue.enqueue(mutation("a"), Priority::Low).await.unwrap();
        let high = queue.enqueue(mutation("b"), Priority::High).await.unwrap();
        let normal1 = queue.enqueue(mutation("c"), Priority::Normal).await.unwrap();
        let normal2 = queue.enqueue(mutation("d"), Priority::Normal).await.unwrap();

        let ids: Vec<Uuid> = queue.peek_pending(10).await.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![high, normal1, normal2, low]);
    }

    #[tokio::test]
    async fn test_ordering_preserved_across_restart() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

        // Enqueue [low, high, normal] at increasing timestamps.
        let (low, high, normal) = {
            let queue = queue_with(store.clone()).await;
            let low = queue.enqueue(mutation("a"), Priority::Low).await.unwrap();
            let high = queue.enqueue(mutation("b"), Priority::High).await.unwrap();
            let normal = queue.enqueue(mutation("c"), Priority::Normal).await.unwrap();
            (low, high, normal)
        };

        // Simulated restart: reload from the same store.
        let queue = queue_with(store).await;
        let ids: Vec<Uuid> = queue.peek_pending(10).await.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![high, normal, low]);
    }

    #[tokio::test]
    async fn test_completed_items_removed_from_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone()).await;

        let id = queue.enqueue(mutation("tasks"), Priority::Normal).await.unwrap();
        queue.mark_completed(id).await.unwrap();

        assert_eq!(queue.pending_count().await, 0);

        // Reload: the item must not come back.
        let queue = queue_with(store).await;
        assert!(queue.peek_pending(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_count_never_exceeds_max() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let id = queue
            .enqueue_with_retries(mutation("tasks"), Priority::Normal, 2)
            .await
            .unwrap();
        let err = ApiError::from_status(500, "boom");

        assert_eq!(queue.mark_failed(id, &err).await.unwrap(), Status::Pending);
        assert_eq!(queue.mark_failed(id, &err).await.unwrap(), Status::Failed);

        let failed = queue.failed_items().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 2);
        assert!(failed[0].last_error.as_deref().unwrap().contains("boom"));
        // No further automatic attempts: the item is out of the pending pool.
        assert!(queue.peek_pending(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_resets_budget() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let id = queue
            .enqueue_with_retries(mutation("tasks"), Priority::Normal, 1)
            .await
            .unwrap();

        queue
            .mark_failed(id, &ApiError::from_status(500, "boom"))
            .await
            .unwrap();
        assert_eq!(queue.failed_items().await.len(), 1);

        queue.retry_failed(id).await.unwrap();
        let pending = queue.peek_pending(10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);
        assert!(pending[0].last_error.is_none());
    }

    #[tokio::test]
    async fn test_in_flight_recovered_as_pending_on_restart() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let id = {
            let queue = queue_with(store.clone()).await;
            let id = queue.enqueue(mutation("tasks"), Priority::Normal).await.unwrap();
            queue.mark_in_flight(id).await.unwrap();
            id
        };

        let queue = queue_with(store).await;
        let pending = queue.peek_pending(10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].status, Status::Pending);
    }

    #[tokio::test]
    async fn test_mark_deferred_keeps_retry_budget() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let id = queue.enqueue(mutation("tasks"), Priority::Normal).await.unwrap();

        queue.mark_in_flight(id).await.unwrap();
        queue.mark_deferred(id).await.unwrap();

        let pending = queue.peek_pending(10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, Status::Pending);
        assert_eq!(pending[0].retry_count, 0);
        assert!(pending[0].last_error.is_none());
    }

    #[tokio::test]
    async fn test_kind_serialization_tags() {
        let item = WorkItem::new(mutation("tasks"), Priority::High, 3);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["kind"], "mutation");
        assert_eq!(value["priority"], "high");

        let telemetry = WorkItem::new(
            WorkKind::Telemetry {
                events: vec![TelemetryEvent::new("app_open", json!({}))],
            },
            Priority::Low,
            3,
        );
        let value = serde_json::to_value(&telemetry).unwrap();
        assert_eq!(value["kind"], "telemetryEvent");

        let restored: WorkItem = serde_json::from_value(value).unwrap();
        assert_eq!(restored, telemetry);
    }

    #[tokio::test]
    async fn test_discard_removes_item() {
        let queue = queue_with(Arc::new(MemoryStore::new())).await;
        let id = queue.enqueue(mutation("tasks"), Priority::Normal).await.unwrap();

        queue.discard(id).await.unwrap();
        assert!(!queue.has_pending().await);
    }
}
