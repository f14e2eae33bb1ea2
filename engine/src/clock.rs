//! Hybrid wall clock used to stamp item modifications.
//!
//! Timestamps are microseconds since the Unix epoch. The clock never hands
//! out the same value twice and never goes backwards, even if the wall clock
//! does, and it is pulled forward by any newer timestamp observed from a
//! peer so that a local edit made after a merge always wins over the merged
//! state.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Monotonic timestamp source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridClock {
    /// Last timestamp handed out or observed
    last: Timestamp,
}

impl HybridClock {
    /// Create a clock that has not yet issued any timestamp.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Issue a new timestamp for a local modification at wall time `now`.
    pub fn tick(&mut self, now: Timestamp) -> Timestamp {
        self.last = now.max(self.last.saturating_add(1));
        self.last
    }

    /// Account for a timestamp received from a peer.
    pub fn observe(&mut self, remote: Timestamp) {
        self.last = self.last.max(remote);
    }

    /// The most recent timestamp issued or observed.
    pub fn last(&self) -> Timestamp {
        self.last
    }
}

/// Convert whole seconds to a timestamp delta.
pub fn secs(secs: u64) -> Timestamp {
    secs.saturating_mul(MICROS_PER_SEC)
}
