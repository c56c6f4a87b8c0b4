//! Status command for showing today's usage and limit standing.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use dwell_core::{DaySchedule, LimitEvaluator, LimitStatus, LimitWindow};
use dwell_db::Database;

use crate::commands::report::format_duration;

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    schedule: &DaySchedule,
    now: DateTime<Utc>,
) -> Result<()> {
    let today = schedule.day_key(now);
    let registry = db.load_limits()?;
    let evaluator = LimitEvaluator::new(*schedule);

    writeln!(writer, "Activity for {today}")?;

    let entries = db.get_range(None, today, today)?;
    if entries.is_empty() {
        writeln!(writer, "No activity recorded today.")?;
    } else {
        for entry in &entries {
            let standing = match evaluator.evaluate(db, &registry, today, &entry.context) {
                LimitStatus::Ok => String::new(),
                LimitStatus::Warning { remaining_ms } => {
                    format!("  [{} left]", format_duration(remaining_ms))
                }
                LimitStatus::Exceeded { window } => {
                    let window = match window {
                        LimitWindow::Daily => "daily",
                        LimitWindow::Weekly => "weekly",
                    };
                    format!("  [{window} limit exceeded]")
                }
            };
            writeln!(
                writer,
                "{:<32} {:>8}{standing}",
                entry.context,
                format_duration(entry.stat.total_time_ms)
            )?;
        }
    }

    if !registry.is_empty() {
        writeln!(writer, "Limits configured: {}", registry.len())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use dwell_core::LimitConfig;

    #[test]
    fn status_shows_usage_and_limit_standing() {
        let mut db = Database::open_in_memory().unwrap();
        let schedule = DaySchedule::default();
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let today = schedule.day_key(now);

        db.credit_time(today, "a.com", 590_000, now).unwrap();
        db.credit_time(today, "b.com", 120_000, now).unwrap();
        db.save_limit("a.com", &LimitConfig::daily(600_000)).unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &schedule, now).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Activity for 2025-01-15"));
        // 590s of a 600s budget sits in the warning band.
        assert!(output.contains("a.com"));
        assert!(output.contains("[0m left]"));
        assert!(!output.contains("b.com  ["));
        assert!(output.contains("Limits configured: 1"));
    }

    #[test]
    fn status_with_no_activity() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let mut output = Vec::new();
        run(&mut output, &db, &DaySchedule::default(), now).unwrap();
        assert!(
            String::from_utf8(output)
                .unwrap()
                .contains("No activity recorded today.")
        );
    }
}
