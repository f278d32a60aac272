//! Reliable messaging bus
//!
//! Delivers command envelopes to a named execution context with retry,
//! backoff, and optional acknowledgement correlation. Before any delivery
//! attempt the bus brings the target context up through the
//! [`crate::context::CreationGate`]; delivery failures of the "no receiver"
//! class are retried under a [`RetryPolicy`], and acknowledgements are
//! correlated back to the sender by request id.

pub mod core;
pub mod envelope;
pub mod retry;
pub mod transport;

pub use core::{BusError, MessageBus, SendOptions};
pub use envelope::{Ack, AckStatus, Envelope, MessageKind};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{ChannelTransport, Transport, TransportError};
