//! Replay command: drives the engine from a JSONL activity stream.
//!
//! Each line is one JSON event with an `event` tag and an `at`
//! timestamp, e.g.:
//!
//! ```json
//! {"event":"navigation","at":"2025-01-15T09:00:00Z","url":"https://example.com/a"}
//! {"event":"tick","at":"2025-01-15T09:05:00Z"}
//! {"event":"idle","at":"2025-01-15T09:10:00Z","idle":true}
//! ```
//!
//! Aggregates, warning flags, and emitted enforcement output are
//! persisted to the database, so a replay run is resumable and
//! reportable like live tracking.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dwell_core::{ActivityTracker, LimitStatus, RecordingSink};
use dwell_db::Database;

use crate::Config;

/// One input event in the replay stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", deny_unknown_fields)]
pub enum ReplayEvent {
    /// The foreground page navigated to a URL.
    Navigation { at: DateTime<Utc>, url: String },
    /// The idle state changed.
    Idle { at: DateTime<Utc>, idle: bool },
    /// No foreground context.
    Deactivated { at: DateTime<Utc> },
    /// Periodic timer.
    Tick { at: DateTime<Utc> },
    /// A focus session starts.
    FocusStart {
        at: DateTime<Utc>,
        duration_ms: i64,
        #[serde(default)]
        blocked: Vec<String>,
        #[serde(default)]
        allowed: Vec<String>,
    },
    /// The focus session ends.
    FocusEnd {
        at: DateTime<Utc>,
        #[serde(default)]
        interrupted: bool,
    },
}

impl ReplayEvent {
    const fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Navigation { at, .. }
            | Self::Idle { at, .. }
            | Self::Deactivated { at }
            | Self::Tick { at }
            | Self::FocusStart { at, .. }
            | Self::FocusEnd { at, .. } => *at,
        }
    }
}

/// Summary of a replay run.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub statuses: Vec<(String, LimitStatus)>,
    pub focus_decisions: Vec<(String, dwell_core::FocusDecision)>,
}

fn read_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ReplayEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid event on line {}", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

pub fn run<W: Write>(
    writer: &mut W,
    db: Database,
    config: &Config,
    path: &Path,
    json: bool,
) -> Result<()> {
    let schedule = config.schedule()?;
    let events = read_events(path)?;
    if events.is_empty() {
        bail!("no events in {}", path.display());
    }

    let registry = db.load_limits()?;
    let first_day = schedule.day_key(events[0].at());
    let warned = db.warned_contexts(first_day)?;

    let mut tracker = ActivityTracker::new(schedule, db, registry);
    tracker.restore_warnings(first_day, warned);

    let mut sink = RecordingSink::new();
    let count = events.len();
    let last_at = events.last().map(ReplayEvent::at);

    for event in events {
        match event {
            ReplayEvent::Navigation { at, url } => tracker.navigated(&url, at, &mut sink),
            ReplayEvent::Idle { at, idle } => tracker.idle_changed(idle, at, &mut sink),
            ReplayEvent::Deactivated { at } => tracker.deactivated(at, &mut sink),
            ReplayEvent::Tick { at } => tracker.tick(at, &mut sink),
            ReplayEvent::FocusStart {
                at,
                duration_ms,
                blocked,
                allowed,
            } => {
                tracker
                    .start_focus(at, duration_ms, blocked, allowed, &mut sink)
                    .context("focus_start rejected")?;
            }
            ReplayEvent::FocusEnd { at, interrupted } => {
                tracker
                    .end_focus(at, interrupted)
                    .context("focus_end rejected")?;
            }
        }
    }

    // Close out the final slice so the stream's full span is persisted.
    if let Some(at) = last_at {
        tracker.deactivated(at, &mut sink);
    }

    let (warned_day, warned_contexts) = tracker.warning_flags();
    if let Some(day) = warned_day {
        tracker
            .store_mut()
            .save_warnings(day, &warned_contexts)
            .context("failed to persist warning flags")?;
    }

    let summary = ReplaySummary {
        events: count,
        statuses: sink.statuses,
        focus_decisions: sink.decisions,
    };

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&summary)?)?;
    } else {
        writeln!(writer, "Replayed {} events", summary.events)?;
        for (context, status) in &summary.statuses {
            writeln!(writer, "limit {context}: {}", serde_json::to_string(status)?)?;
        }
        for (context, decision) in &summary.focus_decisions {
            writeln!(writer, "focus {context}: {decision:?}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    use dwell_core::LimitConfig;

    fn write_events(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    #[test]
    fn parses_tagged_events() {
        let file = write_events(&[
            r#"{"event":"navigation","at":"2025-01-15T09:00:00Z","url":"https://a.com/x"}"#,
            "",
            r#"{"event":"focus_start","at":"2025-01-15T09:01:00Z","duration_ms":1500000}"#,
        ]);
        let events = read_events(file.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ReplayEvent::Navigation { url, .. } if url == "https://a.com/x"));
        assert!(matches!(
            &events[1],
            ReplayEvent::FocusStart { blocked, .. } if blocked.is_empty()
        ));
    }

    #[test]
    fn rejects_unknown_events_with_line_number() {
        let file = write_events(&[
            r#"{"event":"tick","at":"2025-01-15T09:00:00Z"}"#,
            r#"{"event":"mystery","at":"2025-01-15T09:01:00Z"}"#,
        ]);
        let err = read_events(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn replay_credits_time_and_reports_limits() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_limit("a.com", &LimitConfig::daily(600_000)).unwrap();

        let file = write_events(&[
            r#"{"event":"navigation","at":"2025-01-15T09:00:00Z","url":"https://a.com/x"}"#,
            r#"{"event":"tick","at":"2025-01-15T09:05:00Z"}"#,
            r#"{"event":"tick","at":"2025-01-15T09:10:00Z"}"#,
        ]);

        let config = Config::default();
        let mut output = Vec::new();
        run(&mut output, db, &config, file.path(), false).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Replayed 3 events"));
        assert!(output.contains(r#"limit a.com: {"status":"exceeded""#));
    }
}
