//! Exactly-once bookkeeping for pre-deadline warnings.
//!
//! A short-lived lock keyed by `(task_id, minutes_remaining)`: the first
//! acquisition wins the right to emit, later ones are treated as already
//! emitted. Entries expire after a TTL of twice the sweep interval so the
//! map stays bounded while still covering adjacent sweeps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// In-process ledger of emitted `(task, minute)` warning pairs.
#[derive(Debug)]
pub struct WarningLedger {
    ttl: chrono::Duration,
    emitted: Mutex<HashMap<(String, u32), DateTime<Utc>>>,
}

impl WarningLedger {
    /// Create a ledger whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(120)),
            emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Try to acquire the emission slot for a `(task, minute)` pair.
    ///
    /// Returns `true` exactly once per pair within the TTL window.
    pub fn try_acquire(&self, task_id: &str, minutes_remaining: u32, now: DateTime<Utc>) -> bool {
        let Ok(mut emitted) = self.emitted.lock() else {
            // A poisoned lock means an emitter panicked mid-insert; err on
            // the side of not emitting twice.
            return false;
        };

        let key = (task_id.to_owned(), minutes_remaining);
        match emitted.get(&key) {
            Some(at) if now - *at < self.ttl => false,
            _ => {
                emitted.insert(key, now);
                true
            }
        }
    }

    /// Drop entries older than the TTL.
    pub fn prune(&self, now: DateTime<Utc>) {
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.retain(|_, at| now - *at < self.ttl);
        }
    }

    /// Number of live entries, for tests and diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.emitted.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the ledger holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
