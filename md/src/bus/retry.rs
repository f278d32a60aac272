//! Retry policy for envelope delivery
//!
//! Backoff and retry parameters travel with the bus as one configuration
//! value instead of constants scattered at call sites.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the wait between delivery attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backoff {
    /// Same interval between every attempt
    Fixed,
    /// Interval grows as `base * attempt`
    Linear,
}

/// Delivery retry and acknowledgement parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first delivery fails with "no receiver"
    pub max_retries: u32,

    pub backoff: Backoff,

    /// Base wait between attempts
    pub backoff_base: Duration,

    /// Deadline for a correlated acknowledgement
    pub ack_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Linear,
            backoff_base: Duration::from_millis(250),
            ack_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Wait before the given retry (1-based attempt count)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.backoff_base,
            Backoff::Linear => self.backoff_base * attempt.max(1),
        }
    }
}
