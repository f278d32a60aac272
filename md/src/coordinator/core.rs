//! Main coordinator task implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{Ack, BusError, Envelope, MessageBus, MessageKind, SendOptions};
use crate::config::Config;
use crate::domain::{MacroId, OwnerId};
use crate::guard::{DuplicateGuard, InFlightGuard};
use crate::owner::{CallerContext, OwnerResolver};
use crate::state::{ExecutionPhase, PhaseMachine};

use super::handle::CoordinatorHandle;
use super::messages::{CoordError, CoordMetrics, CoordRequest, Reply};

/// Supplies the input a start request should execute
#[async_trait]
pub trait MacroSource: Send + Sync {
    async fn load(&self, id: &MacroId) -> eyre::Result<Value>;
}

/// Source returning one fixed body for every macro id
///
/// Used by the loopback demo and by tests; the `delay` makes the load a real
/// suspension point.
pub struct InlineMacroSource {
    pub body: Value,
    pub delay: Option<Duration>,
}

#[async_trait]
impl MacroSource for InlineMacroSource {
    async fn load(&self, id: &MacroId) -> eyre::Result<Value> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({"macro-id": id, "body": &self.body}))
    }
}

/// The coordinator mediates every action against the worker context
pub struct Coordinator {
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
    bus: MessageBus,
    source: Arc<dyn MacroSource>,
    resolver: OwnerResolver,
    machine: PhaseMachine,
    dedup: DuplicateGuard,
    inflight: InFlightGuard,
    worker_target: String,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        bus: MessageBus,
        source: Arc<dyn MacroSource>,
        resolver: OwnerResolver,
        machine: PhaseMachine,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.bus.channel_buffer);
        Self {
            tx,
            rx,
            bus,
            source,
            resolver,
            machine,
            dedup: DuplicateGuard::new(config.guard.dedup_window(), config.guard.dedup_capacity),
            inflight: InFlightGuard::new(),
            worker_target: config.worker.target.clone(),
        }
    }

    /// Create a client handle for this coordinator
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.tx.clone())
    }

    async fn resolve(&self, candidate: Option<&str>, ctx: &CallerContext) -> Result<OwnerId, CoordError> {
        self.resolver.resolve(candidate, ctx).await.ok_or(CoordError::NoOwner)
    }

    /// Undo a phase write after its dispatch failed
    async fn rollback_phase(&self, owner: &OwnerId, back_to: ExecutionPhase) {
        if let Err(e) = self.machine.transition(owner, back_to, Value::Null).await {
            warn!(owner = %owner, phase = %back_to, error = %e, "Phase rollback failed");
        }
    }

    fn worker_envelope(&self, kind: MessageKind, owner: &OwnerId, payload: Value) -> Envelope {
        Envelope::new(&self.worker_target, kind, Some(owner.clone()), payload)
    }

    /// Dispatch a control command and report its settlement back to the actor
    fn spawn_control_dispatch(
        &self,
        owner: OwnerId,
        kind: MessageKind,
        rollback_to: Option<ExecutionPhase>,
        tab_id: Option<i64>,
        reply: Reply<OwnerId>,
    ) {
        let envelope = self.worker_envelope(kind, &owner, Value::Null);
        let bus = self.bus.clone();
        let coord_tx = self.tx.clone();
        tokio::spawn(async move {
            let result = bus
                .send(
                    envelope,
                    SendOptions {
                        expect_ack: true,
                        tab_id,
                    },
                )
                .await;
            let _ = coord_tx
                .send(CoordRequest::ControlDone {
                    owner,
                    kind,
                    rollback_to,
                    result,
                    reply,
                })
                .await;
        });
    }

    /// Run the coordinator task
    ///
    /// Hydrates persisted state, then processes requests until shutdown.
    pub async fn run(mut self) {
        let coord_tx = self.tx.clone();
        let mut metrics = CoordMetrics::default();

        match self.machine.hydrate().await {
            Ok(report) => {
                for owner in &report.reset_owners {
                    if let Err(e) = self.resolver.forget_owner(owner).await {
                        warn!(owner = %owner, error = %e, "Failed to clear window mappings for stale owner");
                    }
                }
                metrics.hydrate_resets = report.reset_owners.len() as u64;
                info!(
                    records = report.records,
                    resets = report.reset_owners.len(),
                    "Coordinator hydrated"
                );
            }
            Err(e) => {
                warn!(error = %e, "Hydrate failed, continuing with persisted state as-is");
            }
        }

        info!("Coordinator started");

        while let Some(req) = self.rx.recv().await {
            match req {
                CoordRequest::Start {
                    candidate,
                    macro_id,
                    args,
                    ctx,
                    reply,
                } => {
                    let owner = match self.resolve(candidate.as_deref(), &ctx).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    };

                    if self.dedup.should_suppress(Some(&owner), Some(&macro_id)) {
                        metrics.starts_suppressed += 1;
                        let _ = reply.send(Err(CoordError::Suppressed {
                            owner,
                            action: macro_id.to_string(),
                        }));
                        continue;
                    }

                    let Some(token) = self.inflight.try_enter(&owner) else {
                        metrics.starts_suppressed += 1;
                        let _ = reply.send(Err(CoordError::Suppressed {
                            owner,
                            action: macro_id.to_string(),
                        }));
                        continue;
                    };

                    let meta = json!({"macro-id": &macro_id});
                    if let Err(e) = self.machine.transition(&owner, ExecutionPhase::Playing, meta).await {
                        self.inflight.leave(&token);
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }

                    debug!(owner = %owner, macro_id = %macro_id, "Start accepted, loading input");

                    // The load is a suspension point; a stop may land before
                    // it resolves, so its continuation re-checks the token
                    let source = self.source.clone();
                    let load_tx = coord_tx.clone();
                    let id = macro_id.clone();
                    tokio::spawn(async move {
                        let result = source.load(&id).await.map_err(|e| e.to_string());
                        let _ = load_tx
                            .send(CoordRequest::LoadComplete {
                                token,
                                macro_id: id,
                                args,
                                ctx,
                                result,
                                reply,
                            })
                            .await;
                    });
                }

                CoordRequest::LoadComplete {
                    token,
                    macro_id,
                    args,
                    ctx,
                    result,
                    reply,
                } => {
                    if !self.inflight.is_current(&token) {
                        // A stop won the race; the execution engine must not
                        // be invoked for this load
                        debug!(owner = %token.owner(), macro_id = %macro_id, "Discarding load for superseded start");
                        metrics.starts_aborted += 1;
                        let _ = reply.send(Err(CoordError::Aborted {
                            owner: token.owner().clone(),
                        }));
                        continue;
                    }

                    let owner = token.owner().clone();
                    match result {
                        Err(e) => {
                            self.inflight.leave(&token);
                            self.rollback_phase(&owner, ExecutionPhase::Idle).await;
                            let _ = reply.send(Err(CoordError::LoadFailed(e)));
                        }
                        Ok(body) => {
                            let payload = json!({"macro-id": macro_id, "body": body, "args": args});
                            let envelope = self.worker_envelope(MessageKind::Play, &owner, payload);
                            let bus = self.bus.clone();
                            let done_tx = coord_tx.clone();
                            tokio::spawn(async move {
                                let result = bus
                                    .send(
                                        envelope,
                                        SendOptions {
                                            expect_ack: true,
                                            tab_id: ctx.tab_id,
                                        },
                                    )
                                    .await;
                                let _ = done_tx.send(CoordRequest::DispatchDone { token, result, reply }).await;
                            });
                        }
                    }
                }

                CoordRequest::DispatchDone { token, result, reply } => {
                    if !self.inflight.is_current(&token) {
                        metrics.starts_aborted += 1;
                        let _ = reply.send(Err(CoordError::Aborted {
                            owner: token.owner().clone(),
                        }));
                        continue;
                    }

                    let owner = token.owner().clone();
                    self.inflight.leave(&token);

                    match result {
                        Ok(Some(ack)) if ack.is_ok() => {
                            metrics.starts_accepted += 1;
                            debug!(owner = %owner, "Start acknowledged by worker");
                            let _ = reply.send(Ok(owner));
                        }
                        Ok(ack) => {
                            let message = ack
                                .and_then(|a: Ack| a.error)
                                .unwrap_or_else(|| "rejected without detail".to_string());
                            self.rollback_phase(&owner, ExecutionPhase::Idle).await;
                            let _ = reply.send(Err(CoordError::Rejected(message)));
                        }
                        Err(e) => {
                            if matches!(e, BusError::AckTimeout { .. }) {
                                metrics.ack_timeouts += 1;
                            }
                            self.rollback_phase(&owner, ExecutionPhase::Idle).await;
                            let _ = reply.send(Err(e.into()));
                        }
                    }
                }

                CoordRequest::Stop { candidate, ctx, reply } => {
                    let owner = match self.resolve(candidate.as_deref(), &ctx).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    };

                    metrics.stops += 1;

                    // Clearing membership first invalidates any outstanding
                    // load token for this owner
                    let was_in_flight = self.inflight.leave_owner(&owner);
                    debug!(owner = %owner, was_in_flight, "Stop requested");

                    let current = match self.machine.current(&owner).await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            let _ = reply.send(Err(e.into()));
                            continue;
                        }
                    };
                    if !current.phase.is_idle() {
                        if let Err(e) = self.machine.transition(&owner, ExecutionPhase::Idle, Value::Null).await {
                            let _ = reply.send(Err(e.into()));
                            continue;
                        }
                    }

                    // Forward even when already idle; worker stop is idempotent
                    self.spawn_control_dispatch(owner, MessageKind::Stop, None, ctx.tab_id, reply);
                }

                CoordRequest::Pause { candidate, ctx, reply } => {
                    let owner = match self.resolve(candidate.as_deref(), &ctx).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    };

                    if let Err(e) = self.machine.transition(&owner, ExecutionPhase::Paused, Value::Null).await {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }

                    self.spawn_control_dispatch(
                        owner,
                        MessageKind::Pause,
                        Some(ExecutionPhase::Playing),
                        ctx.tab_id,
                        reply,
                    );
                }

                CoordRequest::Resume { candidate, ctx, reply } => {
                    let owner = match self.resolve(candidate.as_deref(), &ctx).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    };

                    if let Err(e) = self.machine.transition(&owner, ExecutionPhase::Playing, Value::Null).await {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }

                    self.spawn_control_dispatch(
                        owner,
                        MessageKind::Resume,
                        Some(ExecutionPhase::Paused),
                        ctx.tab_id,
                        reply,
                    );
                }

                CoordRequest::ControlDone {
                    owner,
                    kind,
                    rollback_to,
                    result,
                    reply,
                } => match result {
                    Ok(Some(ack)) if ack.is_ok() => {
                        debug!(owner = %owner, %kind, "Control acknowledged");
                        let _ = reply.send(Ok(owner));
                    }
                    Ok(ack) => {
                        let message = ack
                            .and_then(|a: Ack| a.error)
                            .unwrap_or_else(|| "rejected without detail".to_string());
                        if let Some(back) = rollback_to {
                            self.rollback_phase(&owner, back).await;
                        }
                        let _ = reply.send(Err(CoordError::Rejected(message)));
                    }
                    Err(e) => {
                        if matches!(e, BusError::AckTimeout { .. }) {
                            metrics.ack_timeouts += 1;
                        }
                        if let Some(back) = rollback_to {
                            self.rollback_phase(&owner, back).await;
                        }
                        let _ = reply.send(Err(e.into()));
                    }
                },

                CoordRequest::QueryState { candidate, ctx, reply } => {
                    let owner = match self.resolve(candidate.as_deref(), &ctx).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    };

                    let result = self.machine.current(&owner).await.map_err(CoordError::from);
                    let _ = reply.send(result);
                }

                CoordRequest::BeginEdit {
                    window,
                    candidate,
                    ctx,
                    reply,
                } => {
                    let owner = match self.resolve(candidate.as_deref(), &ctx).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    };

                    let meta = json!({"window": &window});
                    if let Err(e) = self.machine.transition(&owner, ExecutionPhase::Editing, meta).await {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }

                    if let Err(e) = self.resolver.register_window(&window, &owner).await {
                        // Editing without a remembered window would be
                        // unrecoverable after a restart; back the phase out
                        self.rollback_phase(&owner, ExecutionPhase::Idle).await;
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }

                    let _ = reply.send(Ok(owner));
                }

                CoordRequest::EndEdit { window, reply } => {
                    let owner = match self.resolver.window_closed(&window).await {
                        Ok(owner) => owner,
                        Err(e) => {
                            let _ = reply.send(Err(e.into()));
                            continue;
                        }
                    };

                    if let Some(owner) = &owner {
                        match self.machine.current(owner).await {
                            Ok(snapshot) if snapshot.phase == ExecutionPhase::Editing => {
                                if let Err(e) = self.machine.transition(owner, ExecutionPhase::Idle, Value::Null).await
                                {
                                    let _ = reply.send(Err(e.into()));
                                    continue;
                                }
                            }
                            Ok(snapshot) => {
                                debug!(owner = %owner, phase = %snapshot.phase, "Editor closed outside editing phase");
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e.into()));
                                continue;
                            }
                        }
                    }

                    let _ = reply.send(Ok(owner));
                }

                CoordRequest::WindowOpened { window, owner, reply } => {
                    let result = self
                        .resolver
                        .register_window(&window, &owner)
                        .await
                        .map_err(CoordError::from);
                    let _ = reply.send(result);
                }

                CoordRequest::WindowClosed { window, reply } => {
                    let result = self.resolver.window_closed(&window).await.map_err(CoordError::from);
                    let _ = reply.send(result);
                }

                CoordRequest::Heartbeat => {
                    metrics.heartbeats += 1;
                    match self.machine.heartbeat(Utc::now()).await {
                        Ok(stamped) => debug!(stamped, "Heartbeat re-stamped phases"),
                        Err(e) => warn!(error = %e, "Heartbeat failed"),
                    }
                }

                CoordRequest::GetMetrics { reply } => {
                    let _ = reply.send(metrics.clone());
                }

                CoordRequest::Shutdown => {
                    info!("Coordinator shutting down");
                    break;
                }
            }
        }

        info!("Coordinator stopped");
    }
}
