//! Bus send path: context creation, retry loop, ack correlation

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{ContextFactory, CreateError, CreationGate};

use super::envelope::{Ack, Envelope};
use super::retry::RetryPolicy;
use super::transport::{Transport, TransportError};

/// Errors from a bus send
#[derive(Debug, Error)]
pub enum BusError {
    /// Target context never became reachable within the retry budget
    #[error("no receiver for '{target}' after {attempts} attempts")]
    NoReceiver { target: String, attempts: u32 },

    /// Delivered, but no correlated response arrived within the deadline
    #[error("ack timeout waiting for '{kind}' (owner: {owner_id:?}, tab: {tab_id:?})")]
    AckTimeout {
        kind: String,
        owner_id: Option<String>,
        tab_id: Option<i64>,
    },

    /// The worker context could not be created; no retry was consumed
    #[error("worker context unavailable: {0}")]
    ResourceUnavailable(#[from] CreateError),

    #[error("bus closed")]
    Closed,
}

/// Per-send options
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Suspend until a response correlated by request id arrives
    pub expect_ack: bool,

    /// Originating tab, carried only for timeout diagnostics
    pub tab_id: Option<i64>,
}

struct BusInner {
    transport: Arc<dyn Transport>,
    gate: CreationGate,
    factory: ContextFactory,
    policy: RetryPolicy,
    pending: Mutex<HashMap<String, oneshot::Sender<Ack>>>,
}

/// Reliable envelope delivery with ack correlation
///
/// Cheap to clone; all clones share the pending-request table.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, factory: ContextFactory) -> Self {
        Self {
            inner: Arc::new(BusInner {
                transport,
                gate: CreationGate::new(),
                factory,
                policy,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Send an envelope, optionally suspending for its acknowledgement
    ///
    /// The target context is brought up before any delivery attempt; a
    /// creation failure consumes no retry. "No receiver" delivery failures
    /// are retried under the bus policy. Returns the correlated ack when
    /// `expect_ack` is set, `None` otherwise.
    pub async fn send(&self, mut envelope: Envelope, options: SendOptions) -> Result<Option<Ack>, BusError> {
        let request_id = envelope
            .request_id
            .get_or_insert_with(|| Uuid::now_v7().to_string())
            .clone();

        let ack_rx = if options.expect_ack {
            let (tx, rx) = oneshot::channel();
            let mut pending = self.inner.pending.lock().expect("bus pending lock poisoned");
            pending.insert(request_id.clone(), tx);
            Some(rx)
        } else {
            None
        };

        if let Err(e) = self.deliver_with_retry(&envelope, &request_id).await {
            self.abandon(&request_id);
            return Err(e);
        }

        let Some(ack_rx) = ack_rx else {
            return Ok(None);
        };

        debug!(%request_id, kind = %envelope.kind, "Waiting for acknowledgement");
        match tokio::time::timeout(self.inner.policy.ack_timeout, ack_rx).await {
            Ok(Ok(ack)) => Ok(Some(ack)),
            Ok(Err(_)) => {
                self.abandon(&request_id);
                Err(BusError::Closed)
            }
            Err(_) => {
                self.abandon(&request_id);
                warn!(%request_id, kind = %envelope.kind, "Acknowledgement timed out");
                Err(BusError::AckTimeout {
                    kind: envelope.kind.to_string(),
                    owner_id: envelope.owner_id.as_ref().map(|o| o.to_string()),
                    tab_id: options.tab_id,
                })
            }
        }
    }

    async fn deliver_with_retry(&self, envelope: &Envelope, request_id: &str) -> Result<(), BusError> {
        let policy = &self.inner.policy;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            // The context must exist before every attempt; it may have died
            // between retries
            let factory = self.inner.factory.clone();
            self.inner.gate.ensure(move || factory()).await?;

            match self.inner.transport.deliver(envelope.clone()).await {
                Ok(()) => {
                    debug!(%request_id, attempt, target = %envelope.target, "Envelope delivered");
                    return Ok(());
                }
                Err(TransportError::NoReceiver(target)) if attempt <= policy.max_retries => {
                    debug!(%request_id, attempt, %target, "No receiver, backing off");
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                Err(TransportError::NoReceiver(target)) => {
                    return Err(BusError::NoReceiver {
                        target,
                        attempts: attempt,
                    });
                }
                Err(TransportError::Closed(reason)) => {
                    warn!(%request_id, %reason, "Transport closed");
                    return Err(BusError::Closed);
                }
            }
        }
    }

    /// Complete a pending send with its correlated response
    ///
    /// Returns false when no send is waiting on this request id (already
    /// timed out, or a stray ack).
    pub fn deliver_ack(&self, ack: Ack) -> bool {
        let sender = {
            let mut pending = self.inner.pending.lock().expect("bus pending lock poisoned");
            pending.remove(&ack.request_id)
        };

        match sender {
            Some(tx) => tx.send(ack).is_ok(),
            None => {
                debug!(request_id = %ack.request_id, "Dropping uncorrelated ack");
                false
            }
        }
    }

    /// Number of sends currently awaiting acknowledgement
    pub fn pending_acks(&self) -> usize {
        self.inner.pending.lock().expect("bus pending lock poisoned").len()
    }

    fn abandon(&self, request_id: &str) {
        let mut pending = self.inner.pending.lock().expect("bus pending lock poisoned");
        pending.remove(request_id);
    }
}
