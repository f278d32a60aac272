//! Execution phases and persisted snapshots

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse per-owner execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPhase {
    Idle,
    Playing,
    Paused,
    Editing,
}

impl ExecutionPhase {
    /// The closed transition relation:
    /// `idle -> {playing, editing}`, `playing <-> paused`,
    /// `{playing, paused, editing} -> idle`
    pub fn can_transition_to(self, target: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, target),
            (Idle, Playing) | (Idle, Editing) | (Playing, Paused) | (Paused, Playing) | (Playing, Idle) | (Paused, Idle) | (Editing, Idle)
        )
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Editing => "editing",
        };
        f.write_str(name)
    }
}

/// The persisted record for one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub phase: ExecutionPhase,

    #[serde(default)]
    pub meta: serde_json::Value,

    #[serde(rename = "updated-at")]
    pub updated_at: DateTime<Utc>,
}

impl PhaseSnapshot {
    /// The implicit snapshot for an owner never observed before
    pub fn idle(at: DateTime<Utc>) -> Self {
        Self {
            phase: ExecutionPhase::Idle,
            meta: serde_json::Value::Null,
            updated_at: at,
        }
    }
}
