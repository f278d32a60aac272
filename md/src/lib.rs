//! MacroDaemon - macro execution coordinator
//!
//! The coordination layer between the surfaces that request macro actions and
//! the single worker context that executes them. Every request funnels
//! through one coordinator task, which owns the guards and the persisted
//! phase machine, so concurrent requests are serialized into an unambiguous
//! outcome: exactly one execution per owner, duplicates suppressed, phases
//! persisted before they are acted on.
//!
//! # Modules
//!
//! - [`bus`] - Reliable envelope delivery with retry and ack correlation
//! - [`context`] - Single-flight worker context creation
//! - [`guard`] - Duplicate-start and in-flight guards
//! - [`state`] - Persisted per-owner execution phase machine
//! - [`owner`] - Owner-identity resolution
//! - [`coordinator`] - The actor tying the pieces together
//! - [`worker`] - Loopback execution context for demos and tests
//! - [`config`] - Configuration types and loading

pub mod bus;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod domain;
pub mod guard;
pub mod owner;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use bus::{Ack, AckStatus, BusError, ChannelTransport, Envelope, MessageBus, MessageKind, SendOptions};
pub use config::Config;
pub use context::{ContextFactory, CreateError, CreationGate};
pub use coordinator::{CoordError, CoordMetrics, Coordinator, CoordinatorHandle, MacroSource, spawn_heartbeat};
pub use domain::{MacroId, OwnerId, WindowId};
pub use guard::{DuplicateGuard, FlightToken, InFlightGuard};
pub use owner::{CallerContext, ContainerDirectory, OwnerResolver, StaticDirectory};
pub use state::{ExecutionPhase, PhaseMachine, PhaseSnapshot, StateError};
