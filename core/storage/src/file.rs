//! File-backed store, one file per key.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use tether_common::{ApiError, Result};

use crate::kv::KvStore;

/// Durable key-value store that writes each key to its own file under a
/// base directory.
///
/// Writes go through a temporary file and an atomic rename so a crash
/// mid-write leaves the previous value intact.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_dir`, creating the directory if
    /// needed.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| ApiError::Storage(format!("create store dir: {}", e)))?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are well-known identifiers; anything unexpected is
        // flattened to keep the path inside the base directory.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.base_dir.join(safe)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ApiError::Storage(format!("read {}: {}", key, e))),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, &value)
            .await
            .map_err(|e| ApiError::Storage(format!("write {}: {}", key, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ApiError::Storage(format!("commit {}: {}", key, e)))?;

        debug!(key, bytes = value.len(), "persisted key");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Storage(format!("remove {}: {}", key, e))),
        }
    }
}
