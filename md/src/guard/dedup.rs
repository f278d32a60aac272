//! Short-window duplicate-start suppression

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::{MacroId, OwnerId};

/// Entries older than this multiple of the window are pruned first
const STALE_MULTIPLE: u32 = 4;

/// Bounded map of recently observed (owner, action) start requests
pub struct DuplicateGuard {
    window: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DuplicateGuard {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a start for this (owner, action) pair should be suppressed
    ///
    /// Missing owner or action disables the check: an action whose identity
    /// cannot be determined must not be blocked.
    pub fn should_suppress(&self, owner: Option<&OwnerId>, action: Option<&MacroId>) -> bool {
        let (Some(owner), Some(action)) = (owner, action) else {
            return false;
        };
        self.observe(format!("{owner}:{action}"), Instant::now())
    }

    fn observe(&self, key: String, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("dedup guard lock poisoned");

        if let Some(seen) = entries.get_mut(&key) {
            if now.duration_since(*seen) < self.window {
                *seen = now;
                debug!(%key, "Suppressing duplicate start");
                return true;
            }
        }

        entries.insert(key, now);
        if entries.len() > self.capacity {
            Self::prune(&mut entries, now, self.window, self.capacity);
        }
        false
    }

    /// Drop entries past the staleness multiple, then oldest-first to capacity
    fn prune(entries: &mut HashMap<String, Instant>, now: Instant, window: Duration, capacity: usize) {
        let before = entries.len();
        let stale = window * STALE_MULTIPLE;
        entries.retain(|_, seen| now.duration_since(*seen) <= stale);

        if entries.len() > capacity {
            let mut by_age: Vec<(String, Instant)> = entries.iter().map(|(k, t)| (k.clone(), *t)).collect();
            by_age.sort_by_key(|(_, seen)| *seen);
            for (key, _) in by_age {
                if entries.len() <= capacity {
                    break;
                }
                entries.remove(&key);
            }
        }

        debug!(before, after = entries.len(), "Pruned dedup map");
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.entries.lock().expect("dedup guard lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
