//! Limit evaluation and warning de-duplication.
//!
//! Statuses are computed fresh from aggregates on every call; the only
//! evaluation state kept between calls is the set of contexts already
//! warned today, which resets at day rollover.

use std::collections::HashSet;

use crate::day::{DayKey, DaySchedule};
use crate::limits::{LimitRegistry, LimitStatus, LimitWindow};
use crate::store::AggregateStore;

/// Usage at or past this fraction of a limit enters the warning band.
/// Expressed as a ratio of tenths to keep the comparison in integers.
const WARNING_NUMERATOR: i64 = 9;
const WARNING_DENOMINATOR: i64 = 10;

/// How a tracked evaluation changed the warning flag for its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningTransition {
    /// Usage crossed into the warning band; the warning side effect
    /// fires exactly now.
    Entered,
    /// Usage dropped back below the band (e.g., a limit was raised);
    /// the warning is re-armed.
    Cleared,
}

/// Result of a tracked evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: LimitStatus,
    pub warning_transition: Option<WarningTransition>,
}

impl Evaluation {
    /// Whether this evaluation should reach the enforcement sink.
    ///
    /// `Exceeded` is reported every time (callers are idempotent);
    /// `Warning` only on the transition into the band; `Ok` never.
    #[must_use]
    pub const fn should_emit(&self) -> bool {
        match self.status {
            LimitStatus::Exceeded { .. } => true,
            LimitStatus::Warning { .. } => {
                matches!(self.warning_transition, Some(WarningTransition::Entered))
            }
            LimitStatus::Ok => false,
        }
    }
}

/// Computes limit statuses and de-duplicates warning emission.
#[derive(Debug, Clone)]
pub struct LimitEvaluator {
    schedule: DaySchedule,
    warned_day: Option<DayKey>,
    warned: HashSet<String>,
}

impl LimitEvaluator {
    #[must_use]
    pub fn new(schedule: DaySchedule) -> Self {
        Self {
            schedule,
            warned_day: None,
            warned: HashSet::new(),
        }
    }

    /// Restores persisted warning flags for `day`, typically at startup.
    pub fn restore_warnings<I>(&mut self, day: DayKey, contexts: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.warned_day = Some(day);
        self.warned = contexts.into_iter().collect();
    }

    /// The day the current warning flags belong to.
    #[must_use]
    pub const fn warned_day(&self) -> Option<DayKey> {
        self.warned_day
    }

    /// Contexts currently flagged as warned, sorted for determinism.
    #[must_use]
    pub fn warned_contexts(&self) -> Vec<&str> {
        let mut contexts: Vec<&str> = self.warned.iter().map(String::as_str).collect();
        contexts.sort_unstable();
        contexts
    }

    /// Computes the status for `context` on `day` without touching the
    /// warning flags.
    ///
    /// Store read failures degrade to `Ok`: availability wins over
    /// strict enforcement when the persistence layer is down.
    pub fn evaluate<S>(
        &self,
        store: &S,
        registry: &LimitRegistry,
        day: DayKey,
        context: &str,
    ) -> LimitStatus
    where
        S: AggregateStore + ?Sized,
    {
        let Some(config) = registry.get(context) else {
            return LimitStatus::Ok;
        };
        if !config.enabled {
            return LimitStatus::Ok;
        }
        if config.daily_limit_ms.is_none() && config.weekly_limit_ms.is_none() {
            return LimitStatus::Ok;
        }

        let daily_used = match store.get_stat(day, context) {
            Ok(stat) => stat.map_or(0, |s| s.total_time_ms),
            Err(err) => {
                tracing::warn!(context, %day, %err, "daily usage read failed, failing open");
                return LimitStatus::Ok;
            }
        };
        if let Some(daily_limit) = config.daily_limit_ms {
            if daily_used >= daily_limit {
                return LimitStatus::Exceeded {
                    window: LimitWindow::Daily,
                };
            }
        }

        let weekly = if let Some(weekly_limit) = config.weekly_limit_ms {
            let (first, last) = self.schedule.week_window(day);
            let weekly_used = match store.get_range(Some(context), first, last) {
                Ok(entries) => entries.iter().map(|e| e.stat.total_time_ms).sum::<i64>(),
                Err(err) => {
                    tracing::warn!(context, %day, %err, "weekly usage read failed, failing open");
                    return LimitStatus::Ok;
                }
            };
            if weekly_used >= weekly_limit {
                return LimitStatus::Exceeded {
                    window: LimitWindow::Weekly,
                };
            }
            Some((weekly_used, weekly_limit))
        } else {
            None
        };

        let daily = config.daily_limit_ms.map(|limit| (daily_used, limit));
        warning_status(daily, weekly)
    }

    /// Evaluates and updates the warning flags, resetting them first if
    /// `day` has rolled over since the last call.
    pub fn evaluate_tracked<S>(
        &mut self,
        store: &S,
        registry: &LimitRegistry,
        day: DayKey,
        context: &str,
    ) -> Evaluation
    where
        S: AggregateStore + ?Sized,
    {
        if self.warned_day != Some(day) {
            self.warned.clear();
            self.warned_day = Some(day);
        }

        let status = self.evaluate(store, registry, day, context);
        let warning_transition = match status {
            LimitStatus::Warning { .. } => {
                if self.warned.insert(context.to_string()) {
                    Some(WarningTransition::Entered)
                } else {
                    None
                }
            }
            LimitStatus::Ok => {
                if self.warned.remove(context) {
                    Some(WarningTransition::Cleared)
                } else {
                    None
                }
            }
            LimitStatus::Exceeded { .. } => None,
        };

        Evaluation {
            status,
            warning_transition,
        }
    }
}

/// Picks the warning status from the window closest to breach, measured
/// by remaining fraction of its limit.
fn warning_status(daily: Option<(i64, i64)>, weekly: Option<(i64, i64)>) -> LimitStatus {
    let in_band = |(used, limit): &(i64, i64)| {
        *limit > 0 && used * WARNING_DENOMINATOR >= limit * WARNING_NUMERATOR
    };

    let candidates = [daily.filter(in_band), weekly.filter(in_band)];
    let mut closest: Option<(i64, i64)> = None;
    for (used, limit) in candidates.into_iter().flatten() {
        let remaining = limit - used;
        // remaining/limit < best_remaining/best_limit, cross-multiplied.
        let closer = closest
            .is_none_or(|(best_remaining, best_limit)| remaining * best_limit < best_remaining * limit);
        if closer {
            closest = Some((remaining, limit));
        }
    }

    closest.map_or(LimitStatus::Ok, |(remaining, _)| LimitStatus::Warning {
        remaining_ms: remaining,
    })
}
