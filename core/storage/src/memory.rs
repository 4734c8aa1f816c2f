//! In-memory store for testing and ephemeral use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tether_common::{ApiError, Result};

use crate::kv::KvStore;

/// In-memory key-value store.
///
/// Useful for testing and development. All data is lost on drop, so a
/// "process restart" in tests is simulated by sharing the same instance
/// across two component lifetimes.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ApiError::Storage("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ApiError::Storage("store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ApiError::Storage("store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();

        assert!(store.get("a").await.unwrap().is_none());

        store.set("a", b"value".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap(), b"value");

        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multi_remove() {
        let store = MemoryStore::new();
        store.set("a", vec![1]).await.unwrap();
        store.set("b", vec![2]).await.unwrap();
        store.set("c", vec![3]).await.unwrap();

        store.multi_remove(&["a", "b", "missing"]).await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shared_clone_sees_writes() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(other.get("k").await.unwrap().unwrap(), b"v");
    }
}
