//! Request guards
//!
//! Two related but distinct protections for start requests:
//!
//! - [`DuplicateGuard`] rejects a second identical request arriving within a
//!   short window, whether or not the first one finished.
//! - [`InFlightGuard`] rejects a second concurrent execution for the same
//!   owner, for as long as the first has not reached its cleanup step.
//!
//! Both live in memory only; losing them on a coordinator restart means a
//! duplicate might slip through for a few seconds, which is an acceptable
//! degradation rather than a correctness violation.

pub mod dedup;
pub mod inflight;

pub use dedup::DuplicateGuard;
pub use inflight::{FlightToken, InFlightGuard};
