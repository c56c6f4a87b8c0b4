//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Activity tracker with daily and weekly limits.
///
/// Attributes wall-clock time to browsing contexts, enforces per-context
/// time budgets, and runs distraction-free focus sessions.
#[derive(Debug, Parser)]
#[command(name = "dwell", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show today's usage and limit standing.
    Status,

    /// Summarize usage over a day or week.
    Report {
        /// Report on today.
        #[arg(long, conflicts_with_all = ["last_day", "last_week"])]
        day: bool,

        /// Report on yesterday.
        #[arg(long, conflicts_with = "last_week")]
        last_day: bool,

        /// Report on the previous week.
        #[arg(long)]
        last_week: bool,

        /// Restrict to a single context (e.g. example.com).
        #[arg(long)]
        context: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage per-context time limits.
    Limits {
        #[command(subcommand)]
        action: LimitsAction,
    },

    /// Replay a JSONL activity event stream through the engine.
    Replay {
        /// Path to the event file, one JSON event per line.
        file: PathBuf,

        /// Output the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete aggregates older than the retention window.
    Cleanup {
        /// Number of most recent days to keep.
        #[arg(long, default_value_t = 90)]
        keep_days: u32,
    },
}

/// Limit management subcommands.
#[derive(Debug, Subcommand)]
pub enum LimitsAction {
    /// List configured limits.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Set or replace the limit for a context.
    Set {
        /// The context the limit applies to (e.g. example.com).
        context: String,

        /// Daily budget in minutes.
        #[arg(long)]
        daily: Option<i64>,

        /// Weekly budget in minutes.
        #[arg(long)]
        weekly: Option<i64>,

        /// Keep the limit configured but inactive.
        #[arg(long)]
        disabled: bool,
    },

    /// Remove the limit for a context.
    Remove {
        /// The context to remove.
        context: String,
    },
}
