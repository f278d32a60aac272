//! In-memory backend
//!
//! Session-scoped by nature: contents vanish with the process. Also the
//! backend of choice for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{StorageBackend, StoreResult};

/// Process-local key-value map
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory backend lock poisoned").len()
    }

    /// Whether the backend holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.lock().expect("memory backend lock poisoned");
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        let mut entries = self.entries.lock().expect("memory backend lock poisoned");
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().expect("memory backend lock poisoned");
        Ok(entries.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.lock().expect("memory backend lock poisoned");
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}
