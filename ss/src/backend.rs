//! Storage backend trait and error type

use async_trait::async_trait;
use thiserror::Error;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A key-value backend holding raw JSON strings
///
/// Implementations must make each operation atomic with respect to the
/// others: a reader never observes a half-applied `put`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, overwriting any existing one
    async fn put(&self, key: &str, value: String) -> StoreResult<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List all keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
