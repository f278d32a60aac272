//! File backend
//!
//! Stores the whole key space as one JSON object on disk. Every mutation
//! rewrites the file through a temp-file rename so readers never observe a
//! torn document. A tokio mutex serializes mutations within the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{StorageBackend, StoreError, StoreResult};

/// Single-file JSON document backend
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Create a backend rooted at `path` (the file need not exist yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a backend after verifying the location is writable
    ///
    /// Creates the parent directory and touches the file. Used by
    /// [`crate::KvStore::open_preferred`] to probe the session-scoped
    /// location before falling back to the durable one.
    pub fn probe(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path: PathBuf = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "FileBackend probe succeeded");
        Ok(Self::new(path))
    }

    /// Path of the underlying document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> StoreResult<HashMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_map(&self, map: &HashMap<String, String>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self.read_map().await?;
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value);
        self.write_map(&map).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        let existed = map.remove(key).is_some();
        if existed {
            self.write_map(&map).await?;
        }
        Ok(existed)
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let map = self.read_map().await?;
        Ok(map.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}
