//! Phase machine over the persisted store

use std::time::Duration;

use chrono::{DateTime, Utc};
use statestore::{KvStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::OwnerId;

use super::phase::{ExecutionPhase, PhaseSnapshot};

const EXEC_STATE_NS: &str = "execState:";

/// Errors from phase operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid transition for '{owner}': {from} -> {to}")]
    InvalidTransition {
        owner: OwnerId,
        from: ExecutionPhase,
        to: ExecutionPhase,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// What hydrate found and repaired
#[derive(Debug, Default)]
pub struct HydrateReport {
    /// Persisted records seen
    pub records: usize,
    /// Owners whose stale non-idle phase was reset to idle
    pub reset_owners: Vec<OwnerId>,
}

/// Per-owner phase records, persisted through a [`KvStore`]
#[derive(Clone)]
pub struct PhaseMachine {
    store: KvStore,
    started_at: DateTime<Utc>,
    stale_after: Duration,
}

impl PhaseMachine {
    pub fn new(store: KvStore, stale_after: Duration) -> Self {
        Self {
            store,
            started_at: Utc::now(),
            stale_after,
        }
    }

    fn key(owner: &OwnerId) -> String {
        format!("{EXEC_STATE_NS}{owner}")
    }

    fn owner_from_key(key: &str) -> OwnerId {
        OwnerId::new(key.trim_start_matches(EXEC_STATE_NS))
    }

    /// The authoritative snapshot for an owner; idle on first observation
    pub async fn current(&self, owner: &OwnerId) -> Result<PhaseSnapshot, StateError> {
        let snapshot = self.store.get_json::<PhaseSnapshot>(&Self::key(owner)).await?;
        Ok(snapshot.unwrap_or_else(|| PhaseSnapshot::idle(self.started_at)))
    }

    /// Move an owner to `target` and persist the new snapshot
    ///
    /// A failed write leaves the previously persisted snapshot authoritative;
    /// callers that performed side effects before this call must roll them
    /// back when it fails.
    pub async fn transition(
        &self,
        owner: &OwnerId,
        target: ExecutionPhase,
        meta: serde_json::Value,
    ) -> Result<PhaseSnapshot, StateError> {
        let current = self.current(owner).await?;
        if !current.phase.can_transition_to(target) {
            return Err(StateError::InvalidTransition {
                owner: owner.clone(),
                from: current.phase,
                to: target,
            });
        }

        let snapshot = PhaseSnapshot {
            phase: target,
            meta,
            updated_at: Utc::now(),
        };
        self.store.put_json(&Self::key(owner), &snapshot).await?;

        debug!(owner = %owner, from = %current.phase, to = %target, "Phase transition");
        Ok(snapshot)
    }

    /// Reconcile persisted phases on coordinator startup
    ///
    /// A non-idle phase whose `updated_at` predates this process start was
    /// written by a coordinator instance that no longer exists, so it cannot
    /// be trusted: it is reset to idle and reported so the caller can clear
    /// any ephemeral state (window mappings) remembered for that owner.
    pub async fn hydrate(&self) -> Result<HydrateReport, StateError> {
        let mut report = HydrateReport::default();

        for key in self.store.keys(EXEC_STATE_NS).await? {
            let Some(snapshot) = self.store.get_json::<PhaseSnapshot>(&key).await? else {
                continue;
            };
            report.records += 1;

            if !snapshot.phase.is_idle() && snapshot.updated_at < self.started_at {
                let owner = Self::owner_from_key(&key);
                info!(owner = %owner, phase = %snapshot.phase, "Resetting stale phase from previous instance");
                self.store.put_json(&key, &PhaseSnapshot::idle(Utc::now())).await?;
                report.reset_owners.push(owner);
            }
        }

        Ok(report)
    }

    /// Re-stamp `updated_at` on every non-idle record
    ///
    /// Driven by the external alarm facility; gaps between invocations can be
    /// arbitrarily long, so freshness claims nothing beyond the last stamp.
    pub async fn heartbeat(&self, now: DateTime<Utc>) -> Result<usize, StateError> {
        let mut stamped = 0;

        for key in self.store.keys(EXEC_STATE_NS).await? {
            let Some(mut snapshot) = self.store.get_json::<PhaseSnapshot>(&key).await? else {
                continue;
            };
            if snapshot.phase.is_idle() {
                continue;
            }

            snapshot.updated_at = now;
            if let Err(e) = self.store.put_json(&key, &snapshot).await {
                warn!(%key, error = %e, "Heartbeat re-stamp failed");
                continue;
            }
            stamped += 1;
        }

        Ok(stamped)
    }

    /// Whether a snapshot is old enough to count as abandoned
    pub fn is_stale(&self, snapshot: &PhaseSnapshot, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(snapshot.updated_at);
        age > chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::MAX)
    }
}
