//! Key-value persistence for sync progress
//!
//! [`Watermark`] is the highest block whose events have been fully applied,
//! stored as a decimal string under a configurable key. It only moves
//! forward.

use crate::error::{Result, SyncError};
use crate::event::BlockNumber;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Small string key-value store.
#[async_trait]
pub trait KvStore: Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory key-value store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    values: Arc<RwLock<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::storage(format!("write rejected for key {}", key)));
        }
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Key-value store backed by a single JSON object file.
///
/// Every `set` rewrites the whole file via temp file + rename.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    values: tokio::sync::Mutex<BTreeMap<String, String>>,
}

impl FileKvStore {
    /// Open the store at `path`, loading existing values if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                SyncError::storage(format!("Corrupt state file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(SyncError::storage(format!(
                    "Failed to read state file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self {
            path,
            values: tokio::sync::Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        let json = serde_json::to_string_pretty(&next)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SyncError::storage(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            let tmp_path = path.with_extension("json.tmp");
            std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| {
                SyncError::storage(format!("Failed to write {}: {}", tmp_path.display(), e))
            })?;
            std::fs::rename(&tmp_path, &path).map_err(|e| {
                SyncError::storage(format!("Failed to rename {}: {}", tmp_path.display(), e))
            })
        })
        .await
        .map_err(|e| SyncError::storage(format!("Task join error: {}", e)))??;

        // Only visible once durable.
        *values = next;
        Ok(())
    }
}

/// Monotonic applied-block watermark over a [`KvStore`].
#[derive(Debug, Clone)]
pub struct Watermark {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl Watermark {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored watermark; 0 when never written.
    pub async fn load(&self) -> Result<BlockNumber> {
        match self.kv.get(&self.key).await? {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| {
                SyncError::storage(format!(
                    "Watermark {:?} is not a block number: {:?}",
                    self.key, raw
                ))
            }),
        }
    }

    /// Raise the watermark to `block`. Returns false, writing nothing, when
    /// the stored value is already at or above it.
    pub async fn advance(&self, block: BlockNumber) -> Result<bool> {
        let current = self.load().await?;
        if block <= current {
            return Ok(false);
        }
        self.kv.set(&self.key, &block.to_string()).await?;
        tracing::debug!(key = %self.key, block, "Watermark advanced");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watermark_defaults_to_zero_and_only_moves_forward() {
        let kv = Arc::new(MemoryKvStore::new());
        let watermark = Watermark::new(kv.clone(), "lastBlockNumber");

        assert_eq!(watermark.load().await.unwrap(), 0);
        assert!(watermark.advance(7).await.unwrap());
        assert!(!watermark.advance(5).await.unwrap());
        assert!(!watermark.advance(7).await.unwrap());
        assert_eq!(watermark.load().await.unwrap(), 7);
        assert_eq!(kv.get("lastBlockNumber").await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_unparsable_watermark_is_storage_error() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("lastBlockNumber", "seven").await.unwrap();

        let err = Watermark::new(kv, "lastBlockNumber").load().await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
    }

    #[tokio::test]
    async fn test_failed_write_surfaces() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.fail_writes(true);
        assert!(Watermark::new(kv, "k").advance(1).await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("sync.json");

        let store = FileKvStore::open(&path).await.unwrap();
        store.set("lastBlockNumber", "42").await.unwrap();
        store.set("other", "x").await.unwrap();
        drop(store);

        let reopened = FileKvStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("lastBlockNumber").await.unwrap().as_deref(), Some("42"));
        assert_eq!(reopened.get("other").await.unwrap().as_deref(), Some("x"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(FileKvStore::open(&path).await.is_err());
    }
}
