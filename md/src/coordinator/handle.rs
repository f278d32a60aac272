//! Client handle for the coordinator actor

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{MacroId, OwnerId, WindowId};
use crate::owner::CallerContext;
use crate::state::PhaseSnapshot;

use super::messages::{CoordError, CoordMetrics, CoordRequest};

/// Cloneable handle for sending requests to a running [`Coordinator`]
///
/// [`Coordinator`]: super::Coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CoordError>>) -> CoordRequest,
    ) -> Result<T, CoordError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| CoordError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed)?
    }

    /// Start a macro; resolves to the owner it ran under
    pub async fn start(
        &self,
        candidate: Option<String>,
        macro_id: MacroId,
        args: Value,
        ctx: CallerContext,
    ) -> Result<OwnerId, CoordError> {
        self.request(|reply| CoordRequest::Start {
            candidate,
            macro_id,
            args,
            ctx,
            reply,
        })
        .await
    }

    /// Stop whatever the owner is doing
    pub async fn stop(&self, candidate: Option<String>, ctx: CallerContext) -> Result<OwnerId, CoordError> {
        self.request(|reply| CoordRequest::Stop { candidate, ctx, reply }).await
    }

    pub async fn pause(&self, candidate: Option<String>, ctx: CallerContext) -> Result<OwnerId, CoordError> {
        self.request(|reply| CoordRequest::Pause { candidate, ctx, reply }).await
    }

    pub async fn resume(&self, candidate: Option<String>, ctx: CallerContext) -> Result<OwnerId, CoordError> {
        self.request(|reply| CoordRequest::Resume { candidate, ctx, reply }).await
    }

    /// The persisted phase snapshot for the resolved owner
    pub async fn query_state(
        &self,
        candidate: Option<String>,
        ctx: CallerContext,
    ) -> Result<PhaseSnapshot, CoordError> {
        self.request(|reply| CoordRequest::QueryState { candidate, ctx, reply })
            .await
    }

    /// Open an editor window for an owner
    pub async fn begin_edit(
        &self,
        window: WindowId,
        candidate: Option<String>,
        ctx: CallerContext,
    ) -> Result<OwnerId, CoordError> {
        self.request(|reply| CoordRequest::BeginEdit {
            window,
            candidate,
            ctx,
            reply,
        })
        .await
    }

    /// Close an editor window, returning the owner it belonged to
    pub async fn end_edit(&self, window: WindowId) -> Result<Option<OwnerId>, CoordError> {
        self.request(|reply| CoordRequest::EndEdit { window, reply }).await
    }

    pub async fn window_opened(&self, window: WindowId, owner: OwnerId) -> Result<(), CoordError> {
        self.request(|reply| CoordRequest::WindowOpened { window, owner, reply })
            .await
    }

    pub async fn window_closed(&self, window: WindowId) -> Result<Option<OwnerId>, CoordError> {
        self.request(|reply| CoordRequest::WindowClosed { window, reply }).await
    }

    /// Fire one heartbeat tick
    pub async fn heartbeat(&self) -> Result<(), CoordError> {
        self.tx
            .send(CoordRequest::Heartbeat)
            .await
            .map_err(|_| CoordError::ChannelClosed)
    }

    pub async fn metrics(&self) -> Result<CoordMetrics, CoordError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::GetMetrics { reply: reply_tx })
            .await
            .map_err(|_| CoordError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed)
    }

    /// Ask the coordinator to shut down
    pub async fn shutdown(&self) -> Result<(), CoordError> {
        self.tx
            .send(CoordRequest::Shutdown)
            .await
            .map_err(|_| CoordError::ChannelClosed)
    }
}
