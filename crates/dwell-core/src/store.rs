//! The aggregate store contract and an in-memory implementation.
//!
//! The engine never talks to persistence directly; it writes and reads
//! through [`AggregateStore`]. This keeps the state machine testable with
//! fixtures and lets the SQLite layer live in its own crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::day::DayKey;
use crate::stats::ContextStat;

/// Store failures surfaced to the engine.
///
/// The engine treats every variant as transient: failed credits are
/// retried, failed reads degrade evaluation to `Ok` (fail-open).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not serve the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A persisted record could not be decoded. The day is kept as raw
    /// text since an unparseable day key is one of the corruption modes.
    #[error("corrupt record for {day}/{context}: {message}")]
    CorruptRecord {
        day: String,
        context: String,
        message: String,
    },
}

/// One row of a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry {
    pub day: DayKey,
    pub context: String,
    pub stat: ContextStat,
}

/// Append/merge API for per-day, per-context totals.
///
/// Writes must be atomic per (day, context) key and commutative, so that
/// independent tracker instances crediting concurrently converge.
pub trait AggregateStore {
    /// Adds `delta_ms` to the pair's total time, creating the stat lazily.
    /// Returns the updated stat.
    fn credit_time(
        &mut self,
        day: DayKey,
        context: &str,
        delta_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<ContextStat, StoreError>;

    /// Records one activation of `context` on `day`.
    fn increment_visit(
        &mut self,
        day: DayKey,
        context: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Fetches the stat for a single pair, if any time or visits were
    /// ever recorded.
    fn get_stat(&self, day: DayKey, context: &str) -> Result<Option<ContextStat>, StoreError>;

    /// Fetches all stats in the inclusive day range `[first, last]`,
    /// optionally filtered to one context. Ordered by day, then context.
    fn get_range(
        &self,
        context: Option<&str>,
        first: DayKey,
        last: DayKey,
    ) -> Result<Vec<RangeEntry>, StoreError>;
}

/// In-memory store backed by ordered maps.
///
/// Used by tests and by callers that do not need persistence. Iteration
/// order is deterministic, which keeps test assertions simple.
#[derive(Debug, Default)]
pub struct MemoryStore {
    days: BTreeMap<DayKey, BTreeMap<String, ContextStat>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all day buckets strictly older than `cutoff`.
    pub fn retain_from(&mut self, cutoff: DayKey) {
        self.days.retain(|day, _| *day >= cutoff);
    }

    /// Number of day buckets currently held.
    #[must_use]
    pub fn day_count(&self) -> usize {
        self.days.len()
    }
}

impl AggregateStore for MemoryStore {
    fn credit_time(
        &mut self,
        day: DayKey,
        context: &str,
        delta_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<ContextStat, StoreError> {
        let stat = self
            .days
            .entry(day)
            .or_default()
            .entry(context.to_string())
            .or_insert_with(|| ContextStat::new(now));
        stat.credit(delta_ms, now);
        Ok(*stat)
    }

    fn increment_visit(
        &mut self,
        day: DayKey,
        context: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.days
            .entry(day)
            .or_default()
            .entry(context.to_string())
            .or_insert_with(|| ContextStat::new(now))
            .record_visit(now);
        Ok(())
    }

    fn get_stat(&self, day: DayKey, context: &str) -> Result<Option<ContextStat>, StoreError> {
        Ok(self
            .days
            .get(&day)
            .and_then(|contexts| contexts.get(context))
            .copied())
    }

    fn get_range(
        &self,
        context: Option<&str>,
        first: DayKey,
        last: DayKey,
    ) -> Result<Vec<RangeEntry>, StoreError> {
        let mut entries = Vec::new();
        for (day, contexts) in self.days.range(first..=last) {
            for (name, stat) in contexts {
                if context.is_none_or(|wanted| wanted == name) {
                    entries.push(RangeEntry {
                        day: *day,
                        context: name.clone(),
                        stat: *stat,
                    });
                }
            }
        }
        Ok(entries)
    }
}
