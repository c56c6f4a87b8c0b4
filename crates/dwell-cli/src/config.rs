//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Weekday;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use dwell_core::DaySchedule;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Offset of the local calendar from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// First day of the reporting week (e.g. "monday", "sunday").
    pub week_start: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("dwell.db"),
            utc_offset_minutes: 0,
            week_start: "monday".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (DWELL_*)
        figment = figment.merge(Env::prefixed("DWELL_"));

        figment.extract()
    }

    /// Builds the day/week schedule from the configured offset and
    /// week start.
    pub fn schedule(&self) -> Result<DaySchedule> {
        let week_start = Weekday::from_str(&self.week_start).map_err(|_| {
            anyhow::anyhow!(
                "invalid week_start {:?}, expected a weekday name like \"monday\"",
                self.week_start
            )
        })?;
        DaySchedule::new(self.utc_offset_minutes, week_start)
            .context("invalid utc_offset_minutes")
    }
}

/// Returns the platform-specific config directory for dwell.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dwell"))
}

/// Returns the platform-specific data directory for dwell.
///
/// On Linux: `~/.local/share/dwell`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("dwell"))
}
