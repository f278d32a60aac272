//! Loopback worker context
//!
//! A stand-in execution engine living on the in-process transport. It gives
//! the coordinator a real target to create, deliver to, and await acks from,
//! which is all the coordination layer ever observes of a worker.

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{Ack, ChannelTransport, Envelope, MessageBus, MessageKind};
use crate::config::WorkerConfig;
use crate::context::{ContextFactory, CreateError};
use crate::domain::OwnerId;

/// Consume envelopes and acknowledge each one
///
/// Play enters the owner into the running set; stop removes it. Stop, pause,
/// and resume are acknowledged whether or not the owner is running, matching
/// an execution engine that treats control commands as idempotent.
pub fn spawn_loopback_worker(mut rx: mpsc::Receiver<Envelope>, ack_tx: mpsc::Sender<Ack>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Loopback worker started");
        let mut running: HashSet<OwnerId> = HashSet::new();

        while let Some(envelope) = rx.recv().await {
            let Some(request_id) = envelope.request_id.clone() else {
                debug!(kind = %envelope.kind, "Envelope without request id, nothing to acknowledge");
                continue;
            };

            let ack = match envelope.kind {
                MessageKind::Play => {
                    if envelope.payload.get("body").is_none() {
                        Ack::error(request_id, "play without a macro body")
                    } else {
                        if let Some(owner) = envelope.owner_id.clone() {
                            running.insert(owner);
                        }
                        Ack::ok(request_id, serde_json::json!({"accepted": true}))
                    }
                }
                MessageKind::Stop => {
                    if let Some(owner) = &envelope.owner_id {
                        running.remove(owner);
                    }
                    Ack::ok(request_id, serde_json::json!({"stopped": true}))
                }
                MessageKind::Pause | MessageKind::Resume => Ack::ok(request_id, serde_json::Value::Null),
            };

            if ack_tx.send(ack).await.is_err() {
                warn!("Ack channel closed, loopback worker stopping");
                break;
            }
        }

        info!("Loopback worker stopped");
    })
}

/// Context factory that attaches a loopback worker to the transport
///
/// Attach and spawn happen inside the factory so the worker only exists once
/// something needs it; a concurrent creation attempt observes the existing
/// attachment and reports it instead of spawning a second worker.
pub fn loopback_factory(
    transport: Arc<ChannelTransport>,
    config: &WorkerConfig,
    ack_tx: mpsc::Sender<Ack>,
) -> ContextFactory {
    let target = config.target.clone();
    let buffer = config.channel_buffer;

    Arc::new(move || {
        let transport = transport.clone();
        let ack_tx = ack_tx.clone();
        let target = target.clone();
        async move {
            if transport.is_attached(&target) {
                return Err(CreateError::AlreadyExists);
            }
            let rx = transport.attach(&target, buffer);
            spawn_loopback_worker(rx, ack_tx);
            info!(%target, "Worker context created");
            Ok(())
        }
        .boxed()
    })
}

/// Route worker acks back into the bus's pending table
pub fn spawn_ack_pump(bus: MessageBus, mut ack_rx: mpsc::Receiver<Ack>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ack) = ack_rx.recv().await {
            bus.deliver_ack(ack);
        }
    })
}
