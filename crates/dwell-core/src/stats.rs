//! Per-day, per-context aggregate totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accumulated attention totals for one (day, context) pair.
///
/// `total_time_ms` only ever grows, by non-negative slice durations.
/// `visits` counts transitions into the context, not credited slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStat {
    /// Credited attention time in milliseconds.
    pub total_time_ms: i64,
    /// Number of distinct activations on this day.
    pub visits: i64,
    /// Timestamp of the most recent credited slice or visit.
    pub last_seen: DateTime<Utc>,
}

impl ContextStat {
    /// An empty stat first seen at `seen_at`.
    #[must_use]
    pub const fn new(seen_at: DateTime<Utc>) -> Self {
        Self {
            total_time_ms: 0,
            visits: 0,
            last_seen: seen_at,
        }
    }

    /// Adds credited time. Negative deltas are ignored rather than allowed
    /// to shrink the total.
    pub fn credit(&mut self, delta_ms: i64, seen_at: DateTime<Utc>) {
        if delta_ms > 0 {
            self.total_time_ms += delta_ms;
        }
        self.last_seen = self.last_seen.max(seen_at);
    }

    /// Records one activation.
    pub fn record_visit(&mut self, seen_at: DateTime<Utc>) {
        self.visits += 1;
        self.last_seen = self.last_seen.max(seen_at);
    }

    /// Commutative merge: sums deltas and visits, keeps the latest
    /// `last_seen`. Independent trackers crediting the same key converge
    /// to the same stat regardless of merge order.
    pub fn merge(&mut self, other: &Self) {
        self.total_time_ms += other.total_time_ms;
        self.visits += other.visits;
        self.last_seen = self.last_seen.max(other.last_seen);
    }
}
