//! Creation gate for the worker execution context
//!
//! The underlying creation primitive forbids concurrent instances and returns
//! ambiguous, non-idempotent errors when invoked twice at once, so creation is
//! funneled through a single in-flight marker: the first caller runs the
//! factory, every overlapping caller awaits the same shared future, and the
//! marker is cleared once the attempt settles so a later call can retry from
//! scratch.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors from context creation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CreateError {
    /// The context already exists; treated as success by the gate
    #[error("context already exists")]
    AlreadyExists,

    #[error("context creation failed: {0}")]
    Failed(String),
}

/// Factory handed to the bus for bringing up its target context
pub type ContextFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CreateError>> + Send + Sync>;

type SharedCreate = Shared<BoxFuture<'static, Result<(), CreateError>>>;

/// At-most-one-in-flight creation lock
///
/// The slot holding the shared future is the lock token: at most one exists
/// at any time, owned by the caller that initiated creation, and cleared when
/// the attempt settles regardless of outcome.
#[derive(Default)]
pub struct CreationGate {
    in_flight: Mutex<Option<SharedCreate>>,
}

impl CreationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the context exists, running `factory` at most once concurrently
    ///
    /// An `AlreadyExists` factory error is an idempotent outcome and reported
    /// as success; any other factory error is propagated to every waiter.
    pub async fn ensure<F, Fut>(&self, factory: F) -> Result<(), CreateError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CreateError>> + Send + 'static,
    {
        let (shared, initiated) = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                // A creation is pending; share its outcome instead of
                // invoking the factory again
                Some(existing) if existing.peek().is_none() => (existing.clone(), false),
                _ => {
                    let fut: BoxFuture<'static, Result<(), CreateError>> = async move {
                        match factory().await {
                            Err(CreateError::AlreadyExists) => Ok(()),
                            other => other,
                        }
                    }
                    .boxed();
                    let shared = fut.shared();
                    *slot = Some(shared.clone());
                    debug!("Starting context creation");
                    (shared, true)
                }
            }
        };

        let result = shared.clone().await;

        if initiated {
            let mut slot = self.in_flight.lock().await;
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
                *slot = None;
            }
            debug!(ok = result.is_ok(), "Context creation settled");
        }

        result
    }
}
