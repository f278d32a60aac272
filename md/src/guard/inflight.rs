//! Per-owner in-flight execution guard

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::domain::OwnerId;

/// Proof of in-flight membership for one start attempt
///
/// Carries the generation under which the owner entered the set, so cleanup
/// from an aborted attempt can never evict a later start's membership, and a
/// load continuation can check whether its initiating start is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightToken {
    owner: OwnerId,
    generation: u64,
}

impl FlightToken {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }
}

/// Set of owners currently executing a guarded action
#[derive(Default)]
pub struct InFlightGuard {
    active: Mutex<HashMap<OwnerId, u64>>,
    next_generation: AtomicU64,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the set if the owner is not already in flight
    ///
    /// Check and insert happen under one lock, a single cooperative step.
    pub fn try_enter(&self, owner: &OwnerId) -> Option<FlightToken> {
        let mut active = self.active.lock().expect("in-flight guard lock poisoned");
        if active.contains_key(owner) {
            debug!(owner = %owner, "Owner already in flight");
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        active.insert(owner.clone(), generation);
        Some(FlightToken {
            owner: owner.clone(),
            generation,
        })
    }

    /// Leave the set, but only if this token's start is still the current one
    pub fn leave(&self, token: &FlightToken) -> bool {
        let mut active = self.active.lock().expect("in-flight guard lock poisoned");
        if active.get(&token.owner) == Some(&token.generation) {
            active.remove(&token.owner);
            true
        } else {
            false
        }
    }

    /// Unconditionally remove an owner, invalidating any outstanding token
    ///
    /// The stop path uses this so a load continuation started by an earlier
    /// attempt observes that it has been superseded.
    pub fn leave_owner(&self, owner: &OwnerId) -> bool {
        let mut active = self.active.lock().expect("in-flight guard lock poisoned");
        active.remove(owner).is_some()
    }

    /// Whether this token still represents the owner's current execution
    pub fn is_current(&self, token: &FlightToken) -> bool {
        let active = self.active.lock().expect("in-flight guard lock poisoned");
        active.get(&token.owner) == Some(&token.generation)
    }

    /// Whether the owner has any execution in flight
    pub fn contains(&self, owner: &OwnerId) -> bool {
        let active = self.active.lock().expect("in-flight guard lock poisoned");
        active.contains_key(owner)
    }
}
