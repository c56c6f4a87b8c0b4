//! Limit management commands.

use std::io::Write;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use dwell_core::LimitConfig;
use dwell_db::Database;

use crate::commands::report::format_duration;

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Serialize)]
struct LimitRow<'a> {
    context: &'a str,
    daily_limit_ms: Option<i64>,
    weekly_limit_ms: Option<i64>,
    enabled: bool,
}

pub fn list<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let registry = db.load_limits()?;
    let mut rows: Vec<(&str, &LimitConfig)> = registry.iter().collect();
    rows.sort_by_key(|(context, _)| *context);

    if json {
        let rows: Vec<LimitRow<'_>> = rows
            .iter()
            .map(|(context, config)| LimitRow {
                context,
                daily_limit_ms: config.daily_limit_ms,
                weekly_limit_ms: config.weekly_limit_ms,
                enabled: config.enabled,
            })
            .collect();
        writeln!(writer, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if rows.is_empty() {
        writeln!(writer, "No limits configured.")?;
        return Ok(());
    }

    for (context, config) in rows {
        let daily = config
            .daily_limit_ms
            .map_or_else(|| "-".to_string(), format_duration);
        let weekly = config
            .weekly_limit_ms
            .map_or_else(|| "-".to_string(), format_duration);
        let state = if config.enabled { "" } else { "  (disabled)" };
        writeln!(
            writer,
            "{context:<32} daily {daily:>8}  weekly {weekly:>8}{state}"
        )?;
    }
    Ok(())
}

pub fn set(
    db: &mut Database,
    context: &str,
    daily_minutes: Option<i64>,
    weekly_minutes: Option<i64>,
    disabled: bool,
) -> Result<()> {
    if daily_minutes.is_none() && weekly_minutes.is_none() {
        bail!("at least one of --daily or --weekly is required");
    }
    let config = LimitConfig {
        daily_limit_ms: daily_minutes.map(|m| m.saturating_mul(MS_PER_MINUTE)),
        weekly_limit_ms: weekly_minutes.map(|m| m.saturating_mul(MS_PER_MINUTE)),
        enabled: !disabled,
    };

    // Validate through the registry before persisting.
    let mut registry = db.load_limits()?;
    registry
        .set(context, config)
        .with_context(|| format!("invalid limit for {context}"))?;
    db.save_limit(context, &config)?;

    tracing::info!(context, ?config, "limit saved");
    println!("Limit set for {context}");
    Ok(())
}

pub fn remove(db: &mut Database, context: &str) -> Result<()> {
    if db.remove_limit(context)? {
        println!("Limit removed for {context}");
    } else {
        println!("No limit configured for {context}");
    }
    Ok(())
}
