//! Limit configuration and the registry read model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Usage limits for one context. All quantities are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Cap on one day's total time, if set.
    pub daily_limit_ms: Option<i64>,
    /// Cap on the rolling week's total time, if set.
    pub weekly_limit_ms: Option<i64>,
    /// Disabled configs evaluate to `Ok` without reading usage.
    pub enabled: bool,
}

impl LimitConfig {
    /// An enabled config with only a daily cap.
    #[must_use]
    pub const fn daily(limit_ms: i64) -> Self {
        Self {
            daily_limit_ms: Some(limit_ms),
            weekly_limit_ms: None,
            enabled: true,
        }
    }
}

/// Rejection from [`LimitRegistry::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("daily limit must be non-negative, got {0}")]
    NegativeDailyLimit(i64),
    #[error("weekly limit must be non-negative, got {0}")]
    NegativeWeeklyLimit(i64),
}

/// Outcome of one limit evaluation. Derived fresh each time, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LimitStatus {
    /// Under all configured limits.
    Ok,
    /// Within the warning band of the limit closest to breach.
    Warning { remaining_ms: i64 },
    /// At or past a configured limit.
    Exceeded { window: LimitWindow },
}

/// Which limit window tripped. Daily takes precedence when both are
/// breached, since it is the more specific trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Daily,
    Weekly,
}

/// Map of context to limit config.
///
/// Validates non-negativity on write. It deliberately does not enforce
/// `weekly >= daily`; a weekly cap tighter than seven dailies is a
/// legitimate configuration and the evaluator treats values as given.
#[derive(Debug, Clone, Default)]
pub struct LimitRegistry {
    configs: HashMap<String, LimitConfig>,
}

impl LimitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from already-persisted configs, without
    /// re-validating them.
    #[must_use]
    pub fn from_configs(configs: HashMap<String, LimitConfig>) -> Self {
        Self { configs }
    }

    /// Installs or replaces the config for `context`. The registry is
    /// unchanged when validation rejects the config.
    pub fn set(&mut self, context: &str, config: LimitConfig) -> Result<(), ConfigError> {
        if let Some(daily) = config.daily_limit_ms {
            if daily < 0 {
                return Err(ConfigError::NegativeDailyLimit(daily));
            }
        }
        if let Some(weekly) = config.weekly_limit_ms {
            if weekly < 0 {
                return Err(ConfigError::NegativeWeeklyLimit(weekly));
            }
        }
        self.configs.insert(context.to_string(), config);
        Ok(())
    }

    /// Removes the config for `context`, returning it if present.
    pub fn remove(&mut self, context: &str) -> Option<LimitConfig> {
        self.configs.remove(context)
    }

    #[must_use]
    pub fn get(&self, context: &str) -> Option<&LimitConfig> {
        self.configs.get(context)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LimitConfig)> {
        self.configs.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
