//! Core domain logic for the activity tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Attribution: crediting wall-clock time to browsing contexts
//! - Aggregation: per-day, per-context usage stats
//! - Limits: daily/weekly budgets with a warning and block lifecycle
//! - Focus: time-boxed sessions with allow/block pattern lists

pub mod day;
pub mod evaluator;
pub mod focus;
pub mod limits;
mod resolver;
pub mod sink;
pub mod stats;
pub mod store;
mod tracker;

pub use day::{DayKey, DaySchedule, InvalidDayKey, ScheduleError};
pub use evaluator::{Evaluation, LimitEvaluator, WarningTransition};
pub use focus::{FocusDecision, FocusError, FocusOutcome, FocusSession};
pub use limits::{ConfigError, LimitConfig, LimitRegistry, LimitStatus, LimitWindow};
pub use resolver::resolve_context;
pub use sink::{EnforcementSink, NullSink, RecordingSink};
pub use stats::ContextStat;
pub use store::{AggregateStore, MemoryStore, RangeEntry, StoreError};
pub use tracker::ActivityTracker;
