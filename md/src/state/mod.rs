//! Persisted execution state machine
//!
//! One coarse phase per owner, persisted so it survives coordinator restarts
//! and refreshed by the heartbeat so other observers can tell maintained
//! state from abandoned state.

pub mod machine;
pub mod phase;

pub use machine::{HydrateReport, PhaseMachine, StateError};
pub use phase::{ExecutionPhase, PhaseSnapshot};
