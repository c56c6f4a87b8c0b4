//! Report command for summarizing usage over a day or week.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use dwell_core::{DayKey, DaySchedule};
use dwell_db::Database;

/// Reporting period selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    LastDay,
    Week,
    LastWeek,
}

/// One context's aggregated row in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub context: String,
    pub total_time_ms: i64,
    pub visits: i64,
}

/// The full report payload, also used for JSON output.
#[derive(Debug, Serialize)]
pub struct ReportData {
    pub first_day: DayKey,
    pub last_day: DayKey,
    pub rows: Vec<ReportRow>,
    pub total_time_ms: i64,
}

/// Resolves a period to an inclusive day range.
#[must_use]
pub fn period_range(
    schedule: &DaySchedule,
    period: Period,
    now: DateTime<Utc>,
) -> (DayKey, DayKey) {
    let today = schedule.day_key(now);
    match period {
        Period::Day => (today, today),
        Period::LastDay => (today.pred(), today.pred()),
        Period::Week => schedule.week_window(today),
        Period::LastWeek => {
            let (first, _) = schedule.week_window(today);
            schedule.week_window(first.pred())
        }
    }
}

/// Formats milliseconds as a duration string.
/// Returns "Xh Ym" if >= 1 hour, "Xm" otherwise.
#[must_use]
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0m".to_string();
    }
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Builds the report: rows merged across the day range, one per
/// context, sorted by time descending then context ascending.
pub fn build_report(
    db: &Database,
    context: Option<&str>,
    first: DayKey,
    last: DayKey,
) -> Result<ReportData> {
    let entries = db.get_range(context, first, last)?;

    let mut by_context: BTreeMap<String, ReportRow> = BTreeMap::new();
    for entry in entries {
        let row = by_context
            .entry(entry.context.clone())
            .or_insert_with(|| ReportRow {
                context: entry.context,
                total_time_ms: 0,
                visits: 0,
            });
        row.total_time_ms += entry.stat.total_time_ms;
        row.visits += entry.stat.visits;
    }

    let mut rows: Vec<ReportRow> = by_context.into_values().collect();
    rows.sort_by(|a, b| {
        b.total_time_ms
            .cmp(&a.total_time_ms)
            .then_with(|| a.context.cmp(&b.context))
    });
    let total_time_ms = rows.iter().map(|r| r.total_time_ms).sum();

    Ok(ReportData {
        first_day: first,
        last_day: last,
        rows,
        total_time_ms,
    })
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    schedule: &DaySchedule,
    period: Period,
    context: Option<&str>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let (first, last) = period_range(schedule, period, now);
    let data = build_report(db, context, first, last)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&data)?)?;
        return Ok(());
    }

    if first == last {
        writeln!(writer, "Usage for {first}")?;
    } else {
        writeln!(writer, "Usage for {first} through {last}")?;
    }

    if data.rows.is_empty() {
        writeln!(writer, "No activity recorded.")?;
        return Ok(());
    }

    for row in &data.rows {
        writeln!(
            writer,
            "{:<32} {:>8}  {:>4} visits",
            row.context,
            format_duration(row.total_time_ms),
            row.visits
        )?;
    }
    writeln!(writer, "Total: {}", format_duration(data.total_time_ms))?;

    Ok(())
}
