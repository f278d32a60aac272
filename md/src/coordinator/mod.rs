//! Coordination core
//!
//! The coordinator is an actor owning every guard and the phase machine, so
//! each request is handled as one uninterrupted sequence of cooperative
//! steps. Slow work (macro input loads, bus dispatches awaiting their ack)
//! runs in spawned tasks that re-enter the actor through internal requests;
//! the actor alone decides how each settlement affects guards and phases.

pub mod core;
pub mod handle;
pub mod heartbeat;
pub mod messages;

pub use core::{Coordinator, InlineMacroSource, MacroSource};
pub use handle::CoordinatorHandle;
pub use heartbeat::spawn_heartbeat;
pub use messages::{CoordError, CoordMetrics, CoordRequest};
