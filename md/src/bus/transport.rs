//! Transport seam and the in-process channel transport

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::envelope::Envelope;

/// Errors from one delivery attempt
#[derive(Debug, Error)]
pub enum TransportError {
    /// Target context not currently reachable; the bus retries this class
    #[error("no receiver for target '{0}'")]
    NoReceiver(String),

    #[error("transport closed: {0}")]
    Closed(String),
}

/// One-shot envelope delivery to a named context
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// In-process transport backed by per-target channels
///
/// Execution contexts attach under a target name and receive envelopes on an
/// mpsc channel; a dropped receiver reads as "no receiver" again, so a dead
/// context looks exactly like an absent one.
#[derive(Default)]
pub struct ChannelTransport {
    registry: Mutex<HashMap<String, mpsc::Sender<Envelope>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a context under `target`, returning its envelope stream
    ///
    /// Replaces any previous attachment for the same target.
    pub fn attach(&self, target: &str, buffer: usize) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(buffer);
        let mut registry = self.registry.lock().expect("transport registry lock poisoned");
        registry.insert(target.to_string(), tx);
        debug!(%target, "Context attached to transport");
        rx
    }

    /// Remove a context's attachment
    pub fn detach(&self, target: &str) {
        let mut registry = self.registry.lock().expect("transport registry lock poisoned");
        registry.remove(target);
        debug!(%target, "Context detached from transport");
    }

    /// Whether a live sender is registered for `target`
    pub fn is_attached(&self, target: &str) -> bool {
        let registry = self.registry.lock().expect("transport registry lock poisoned");
        registry.get(target).is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, envelope: Envelope) -> Result<(), TransportError> {
        let sender = {
            let registry = self.registry.lock().expect("transport registry lock poisoned");
            registry.get(&envelope.target).cloned()
        };

        let Some(sender) = sender else {
            return Err(TransportError::NoReceiver(envelope.target));
        };

        let target = envelope.target.clone();
        if sender.send(envelope).await.is_err() {
            // Receiver dropped since attach
            let mut registry = self.registry.lock().expect("transport registry lock poisoned");
            registry.remove(&target);
            return Err(TransportError::NoReceiver(target));
        }

        Ok(())
    }
}
