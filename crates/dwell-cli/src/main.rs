use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dwell_cli::commands::{cleanup, limits, replay, report, status};
use dwell_cli::{Cli, Commands, Config, LimitsAction};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(dwell_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db =
        dwell_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let schedule = config.schedule()?;
            status::run(&mut stdout, &db, &schedule, Utc::now())?;
        }
        Some(Commands::Report {
            day,
            last_day,
            last_week,
            context,
            json,
        }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let schedule = config.schedule()?;
            let period = if day {
                report::Period::Day
            } else if last_day {
                report::Period::LastDay
            } else if last_week {
                report::Period::LastWeek
            } else {
                report::Period::Week
            };
            report::run(
                &mut stdout,
                &db,
                &schedule,
                period,
                context.as_deref(),
                json,
                Utc::now(),
            )?;
        }
        Some(Commands::Limits { action }) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                LimitsAction::List { json } => limits::list(&mut stdout, &db, json)?,
                LimitsAction::Set {
                    context,
                    daily,
                    weekly,
                    disabled,
                } => limits::set(&mut db, &context, daily, weekly, disabled)?,
                LimitsAction::Remove { context } => limits::remove(&mut db, &context)?,
            }
        }
        Some(Commands::Replay { file, json }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            replay::run(&mut stdout, db, &config, &file, json)?;
        }
        Some(Commands::Cleanup { keep_days }) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            let schedule = config.schedule()?;
            cleanup::run(&mut stdout, &mut db, &schedule, keep_days, Utc::now())?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}
