//! Periodic freshness ticks
//!
//! Stands in for the host alarm facility: fires at a fixed period so the
//! phase machine can re-stamp non-idle records. Ticks are best-effort; a
//! missed tick is delayed rather than bursted.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::handle::CoordinatorHandle;

/// Spawn the heartbeat ticker; stops when the coordinator goes away
pub fn spawn_heartbeat(handle: CoordinatorHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "Heartbeat ticker started");

        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it, hydrate just ran
        interval.tick().await;

        loop {
            interval.tick().await;
            if handle.heartbeat().await.is_err() {
                debug!("Coordinator gone, heartbeat ticker stopping");
                break;
            }
        }
    })
}
