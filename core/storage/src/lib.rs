//! Persistence surface for the Tether offline layer.
//!
//! Provides the key-value contract the durable queue and the telemetry
//! batcher persist through, plus two implementations:
//! - [`MemoryStore`] for tests and ephemeral use
//! - [`FileStore`] for durable, one-file-per-key storage

pub mod file;
pub mod kv;
pub mod memory;

pub use file::FileStore;
pub use kv::{KvStore, OFFLINE_EVENTS_KEY, SYNC_QUEUE_KEY};
pub use memory::MemoryStore;
