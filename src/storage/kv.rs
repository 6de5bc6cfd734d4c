//! Key-value storage capability.
//!
//! All durable state (feed cache, rate-limit flag, saved articles) is kept
//! as JSON strings under flat string keys, so the storage engine itself
//! stays swappable: the composing application injects whichever
//! [`KeyValueStore`] it owns. Two reference implementations ship here —
//! an in-memory map for tests and short-lived runs, and a single-file JSON
//! store whose writes go through a temp-file-then-rename so the backing
//! file is never left half-written.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by store implementations.
///
/// Callers in this crate treat these as soft failures: reads degrade to
/// "no value", writes are logged and dropped. The error type exists so the
/// composing application can react differently if it wants to.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but does not parse as a JSON string map.
    #[error("Storage format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Minimal asynchronous key-value contract.
///
/// Mirrors the surface the feed cache and saved-articles store actually
/// use: point reads/writes plus batched variants for entries that are
/// written together (a cache payload and its timestamp).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Batched read. The result is positionally aligned with `keys`.
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

    /// Batched write. Either all pairs land or the error is reported; there
    /// is no partial-success signal.
    async fn multi_set(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// String values cannot be left half-mutated, so a poisoned lock still
    /// guards a coherent map.
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let entries = self.entries();
        Ok(keys.iter().map(|k| entries.get(*k).cloned()).collect())
    }

    async fn multi_set(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut entries = self.entries();
        for (key, value) in pairs {
            entries.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut entries = self.entries();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// File-backed store: one JSON object mapping keys to string values.
///
/// Every mutation rewrites the whole file through a randomized temp path
/// followed by an atomic rename, so a crash mid-write leaves the previous
/// contents intact. An internal async mutex serializes read-modify-write
/// cycles; concurrent readers see either the old or the new file, never a
/// torn one.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Open a store at `path`, creating parent directories as needed.
    /// The file itself is created lazily on first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        // Randomized temp filename so two processes racing on the same path
        // cannot collide on the intermediate file.
        use std::time::{SystemTime, UNIX_EPOCH};
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = self.path.with_extension(format!("tmp.{:016x}", suffix));

        let bytes = serde_json::to_vec(entries)?;
        tokio::fs::write(&temp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let mut entries = self.load().await?;
        Ok(keys.iter().map(|k| entries.remove(*k)).collect())
    }

    async fn multi_set(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        for (key, value) in pairs {
            entries.insert((*key).to_string(), (*value).to_string());
        }
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let mut changed = false;
        for key in keys {
            changed |= entries.remove(*key).is_some();
        }
        if changed {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
