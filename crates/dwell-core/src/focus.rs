//! Time-boxed focus sessions with allow/block pattern lists.
//!
//! While a session is active it supersedes limit-based blocking: the
//! decision for a context comes solely from the session's pattern
//! lists. Sessions expire on their own inside [`FocusSession::decide`]
//! so a late timer tick can never extend blocking past the end time.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

/// Fraction of the planned duration (in tenths) that must elapse before
/// an uninterrupted session counts as completed.
const COMPLETION_NUMERATOR: i64 = 9;
const COMPLETION_DENOMINATOR: i64 = 10;

/// Verdict for a context while a focus session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusDecision {
    Allow,
    Block,
}

/// Focus session lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FocusError {
    #[error("focus duration must be positive, got {0} ms")]
    InvalidDuration(i64),
    #[error("a focus session is already active")]
    AlreadyActive,
    #[error("no active focus session")]
    NotActive,
}

/// Completion record produced when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FocusOutcome {
    /// How long the session actually ran, in milliseconds.
    pub actual_duration_ms: i64,
    /// True when the session was not interrupted and ran at least 90%
    /// of its planned duration.
    pub completed: bool,
}

/// An active focus session.
#[derive(Debug, Clone)]
pub struct FocusSession {
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    planned_duration_ms: i64,
    blocked_patterns: Vec<String>,
    allowed_patterns: Vec<String>,
}

impl FocusSession {
    /// Starts a session running from `now` for `duration_ms`.
    ///
    /// Patterns are stored lowercased; matching is case-insensitive.
    pub fn start(
        now: DateTime<Utc>,
        duration_ms: i64,
        blocked_patterns: Vec<String>,
        allowed_patterns: Vec<String>,
    ) -> Result<Self, FocusError> {
        if duration_ms <= 0 {
            return Err(FocusError::InvalidDuration(duration_ms));
        }
        let lowercase = |patterns: Vec<String>| {
            patterns
                .into_iter()
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Ok(Self {
            started_at: now,
            ends_at: now + Duration::milliseconds(duration_ms),
            planned_duration_ms: duration_ms,
            blocked_patterns: lowercase(blocked_patterns),
            allowed_patterns: lowercase(allowed_patterns),
        })
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    /// Whether the session is still running at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.ends_at
    }

    /// Decides whether `context` may be shown at `now`.
    ///
    /// Allow-list entries win over block-list entries, which resolves a
    /// context matching both. An expired session allows everything even
    /// if the ending timer has not fired yet.
    #[must_use]
    pub fn decide(&self, context: &str, now: DateTime<Utc>) -> FocusDecision {
        if !self.is_active(now) {
            return FocusDecision::Allow;
        }
        let context = context.to_ascii_lowercase();
        if matches_any(&self.allowed_patterns, &context) {
            return FocusDecision::Allow;
        }
        if matches_any(&self.blocked_patterns, &context) {
            return FocusDecision::Block;
        }
        FocusDecision::Allow
    }

    /// Ends the session at `now` and reports the completion record.
    #[must_use]
    pub fn end(self, now: DateTime<Utc>, interrupted: bool) -> FocusOutcome {
        // A late ending timer does not inflate the actual duration past
        // the planned window.
        let effective_end = now.min(self.ends_at).max(self.started_at);
        let actual_duration_ms = (effective_end - self.started_at).num_milliseconds();
        let completed = !interrupted
            && actual_duration_ms * COMPLETION_DENOMINATOR
                >= self.planned_duration_ms * COMPLETION_NUMERATOR;
        FocusOutcome {
            actual_duration_ms,
            completed,
        }
    }
}

fn matches_any(patterns: &[String], context: &str) -> bool {
    patterns.iter().any(|p| pattern_matches(p, context))
}

/// Matches a lowercased context against a lowercased pattern.
///
/// A pattern is `*` (everything), a `*.`-prefixed subdomain wildcard
/// anchored at a label boundary, or an exact context string. The
/// wildcard does not match the bare apex: `*.example.com` matches
/// `a.example.com` but not `example.com`.
fn pattern_matches(pattern: &str, context: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(apex) = pattern.strip_prefix("*.") {
        return context.len() > apex.len() + 1
            && context.ends_with(apex)
            && context.as_bytes()[context.len() - apex.len() - 1] == b'.';
    }
    pattern == context
}
