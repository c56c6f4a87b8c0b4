//! Cleanup command: enforces the retention window.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use dwell_core::{DayKey, DaySchedule};
use dwell_db::Database;

/// Deletes whole day buckets older than `keep_days` days, counting
/// today as day one.
pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    schedule: &DaySchedule,
    keep_days: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    let cutoff = cutoff_day(schedule, keep_days, now);
    let deleted = db.cleanup(cutoff)?;
    tracing::info!(%cutoff, deleted, "cleanup complete");
    writeln!(writer, "Deleted {deleted} rows before {cutoff}")?;
    Ok(())
}

fn cutoff_day(schedule: &DaySchedule, keep_days: u32, now: DateTime<Utc>) -> DayKey {
    let mut cutoff = schedule.day_key(now);
    for _ in 1..keep_days {
        cutoff = cutoff.pred();
    }
    cutoff
}
