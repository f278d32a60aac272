//! Coordinator requests, errors, and metrics

use serde_json::Value;
use statestore::StoreError;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::bus::{Ack, BusError, MessageKind};
use crate::domain::{MacroId, OwnerId, WindowId};
use crate::guard::FlightToken;
use crate::owner::CallerContext;
use crate::state::{ExecutionPhase, PhaseSnapshot, StateError};

/// Errors surfaced to callers of the coordination layer
#[derive(Debug, Error)]
pub enum CoordError {
    /// Not a true failure: a prior request is already handling this action
    #[error("suppressed: '{owner}' already has '{action}' pending")]
    Suppressed { owner: OwnerId, action: String },

    /// A concurrent stop superseded this start before it could dispatch
    #[error("start aborted by a concurrent stop for '{owner}'")]
    Aborted { owner: OwnerId },

    #[error("could not resolve an owner for the request")]
    NoOwner,

    #[error("macro load failed: {0}")]
    LoadFailed(String),

    /// The worker acknowledged but refused the command
    #[error("worker rejected the command: {0}")]
    Rejected(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("coordinator channel closed")]
    ChannelClosed,
}

impl CoordError {
    /// Guard rejections require no rollback; the request acquired nothing
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }
}

/// Reply channel for one coordinator operation
pub type Reply<T> = oneshot::Sender<Result<T, CoordError>>;

/// Requests handled by the coordinator actor
#[derive(Debug)]
pub enum CoordRequest {
    /// Start a macro for an owner
    Start {
        candidate: Option<String>,
        macro_id: MacroId,
        args: Value,
        ctx: CallerContext,
        reply: Reply<OwnerId>,
    },

    /// Stop whatever the owner is doing, including an in-flight start
    Stop {
        candidate: Option<String>,
        ctx: CallerContext,
        reply: Reply<OwnerId>,
    },

    Pause {
        candidate: Option<String>,
        ctx: CallerContext,
        reply: Reply<OwnerId>,
    },

    Resume {
        candidate: Option<String>,
        ctx: CallerContext,
        reply: Reply<OwnerId>,
    },

    /// Read the persisted phase snapshot
    QueryState {
        candidate: Option<String>,
        ctx: CallerContext,
        reply: Reply<PhaseSnapshot>,
    },

    /// Open an editor window for an owner (`idle -> editing`)
    BeginEdit {
        window: WindowId,
        candidate: Option<String>,
        ctx: CallerContext,
        reply: Reply<OwnerId>,
    },

    /// Editor window closed (`editing -> idle`)
    EndEdit {
        window: WindowId,
        reply: Reply<Option<OwnerId>>,
    },

    /// An ephemeral window opened for an owner
    WindowOpened {
        window: WindowId,
        owner: OwnerId,
        reply: Reply<()>,
    },

    /// An ephemeral window closed
    WindowClosed {
        window: WindowId,
        reply: Reply<Option<OwnerId>>,
    },

    /// Periodic alarm tick
    Heartbeat,

    /// Get current metrics
    GetMetrics {
        reply: oneshot::Sender<CoordMetrics>,
    },

    /// Shut the coordinator down
    Shutdown,

    /// Macro input finished loading (internal)
    LoadComplete {
        token: FlightToken,
        macro_id: MacroId,
        args: Value,
        ctx: CallerContext,
        result: Result<Value, String>,
        reply: Reply<OwnerId>,
    },

    /// A start dispatch settled (internal)
    DispatchDone {
        token: FlightToken,
        result: Result<Option<Ack>, BusError>,
        reply: Reply<OwnerId>,
    },

    /// A stop/pause/resume dispatch settled (internal)
    ControlDone {
        owner: OwnerId,
        kind: MessageKind,
        rollback_to: Option<ExecutionPhase>,
        result: Result<Option<Ack>, BusError>,
        reply: Reply<OwnerId>,
    },
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CoordMetrics {
    pub starts_accepted: u64,
    pub starts_suppressed: u64,
    pub starts_aborted: u64,
    pub stops: u64,
    pub ack_timeouts: u64,
    pub heartbeats: u64,
    pub hydrate_resets: u64,
}
