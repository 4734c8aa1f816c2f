//! Key-value persistence contract.

use async_trait::async_trait;

use tether_common::Result;

/// Well-known key under which the durable operation queue is persisted.
pub const SYNC_QUEUE_KEY: &str = "sync_queue";
/// Well-known key under which the offline telemetry buffer is persisted.
pub const OFFLINE_EVENTS_KEY: &str = "offline_events";

/// Key-value persistence surface used to serialize the work item list
/// and the offline event buffer as JSON-encoded arrays.
///
/// Each well-known key is owned exclusively by one component; no other
/// component writes to it directly.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value stored under `key`. Removing a missing key is
    /// not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove several keys in one call.
    async fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}
