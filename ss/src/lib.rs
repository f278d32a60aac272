//! StateStore - namespaced key-value persistence
//!
//! Small persistence layer for daemons that must survive their own restarts.
//! Values are JSON documents addressed by string keys; logical namespaces are
//! key prefixes (e.g. `execState:<owner>`). Two backends are provided:
//!
//! - [`MemoryBackend`] - in-process map, cleared when the process exits
//! - [`FileBackend`] - a single JSON document on disk, rewritten atomically
//!
//! [`KvStore::open_preferred`] opens a session-scoped store (typically under
//! the runtime directory, cleared between host restarts) and falls back to a
//! durable one when the session location is unavailable. Callers that care
//! about trusting leftover state can inspect the returned [`BackendKind`].

pub mod backend;
pub mod file;
pub mod memory;
pub mod store;

pub use backend::{StorageBackend, StoreError, StoreResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use store::{BackendKind, KvStore};
