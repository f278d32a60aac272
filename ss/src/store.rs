//! Typed store facade over a storage backend

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backend::{StorageBackend, StoreResult};
use crate::file::FileBackend;
use crate::memory::MemoryBackend;

/// Which backend class a store ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Session-scoped location, cleared between host restarts
    Session,
    /// Durable location; leftover state may predate the current host session
    Durable,
}

/// Typed JSON key-value store
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn StorageBackend>,
}

impl KvStore {
    /// Wrap an existing backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// In-memory store, for tests and embedded use
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open the preferred session-scoped store, falling back to the durable one
    ///
    /// The session path is probed first; if it cannot be created the durable
    /// path is used instead. The returned [`BackendKind`] tells the caller
    /// which location won, since state hydrated from the durable store may
    /// predate the current host session and deserves extra suspicion.
    pub fn open_preferred(session_path: &Path, durable_path: &Path) -> StoreResult<(Self, BackendKind)> {
        match FileBackend::probe(session_path) {
            Ok(backend) => {
                debug!(path = %session_path.display(), "Opened session-scoped store");
                Ok((Self::new(Arc::new(backend)), BackendKind::Session))
            }
            Err(e) => {
                warn!(
                    session_path = %session_path.display(),
                    error = %e,
                    "Session store unavailable, falling back to durable store"
                );
                let backend = FileBackend::probe(durable_path)?;
                Ok((Self::new(Arc::new(backend)), BackendKind::Durable))
            }
        }
    }

    /// Read and deserialize a value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.put(key, raw).await
    }

    /// Remove a key, returning whether it existed
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.backend.delete(key).await
    }

    /// List keys under a namespace prefix
    pub async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.backend.keys(prefix).await
    }
}
