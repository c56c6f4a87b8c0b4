//! The activity attribution state machine.
//!
//! One tracker instance owns the currently active context, the open
//! slice being credited, the idle flag, and the focus session. Every
//! input takes an explicit `now`, so tests and offline replay drive the
//! machine deterministically.
//!
//! The crediting discipline: any transition that changes which
//! (context, idle) combination is eligible for crediting first closes
//! the open slice, crediting its elapsed time to the store (split
//! across day boundaries), and only then mutates state. Every close
//! pushes a limit evaluation for the credited context.

use chrono::{DateTime, Utc};

use crate::day::{DayKey, DaySchedule};
use crate::evaluator::LimitEvaluator;
use crate::focus::{FocusError, FocusOutcome, FocusSession};
use crate::limits::{LimitRegistry, LimitStatus};
use crate::resolver::resolve_context;
use crate::sink::EnforcementSink;
use crate::store::AggregateStore;

/// The currently open, uncredited slice.
///
/// The slice carries its own context so a credit that fails and gets
/// queued for retry is never attributed to a later context.
#[derive(Debug, Clone)]
struct OpenSlice {
    context: String,
    started_at: DateTime<Utc>,
}

/// A credit that failed to write and is awaiting retry.
#[derive(Debug, Clone)]
struct PendingCredit {
    day: DayKey,
    context: String,
    delta_ms: i64,
    seen_at: DateTime<Utc>,
}

/// The activity attribution and limit enforcement engine.
///
/// Inputs are expected to arrive serialized (the host delivers events
/// on a single logical thread); the tracker performs no interior
/// locking of its own.
#[derive(Debug)]
pub struct ActivityTracker<S> {
    schedule: DaySchedule,
    store: S,
    registry: LimitRegistry,
    evaluator: LimitEvaluator,
    focus: Option<FocusSession>,
    last_focus_outcome: Option<FocusOutcome>,
    active_context: Option<String>,
    slice: Option<OpenSlice>,
    idle: bool,
    pending_credits: Vec<PendingCredit>,
}

impl<S: AggregateStore> ActivityTracker<S> {
    #[must_use]
    pub fn new(schedule: DaySchedule, store: S, registry: LimitRegistry) -> Self {
        Self {
            schedule,
            store,
            registry,
            evaluator: LimitEvaluator::new(schedule),
            focus: None,
            last_focus_outcome: None,
            active_context: None,
            slice: None,
            idle: false,
            pending_credits: Vec::new(),
        }
    }

    /// Restores persisted warning flags, typically right after startup.
    pub fn restore_warnings<I>(&mut self, day: DayKey, contexts: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.evaluator.restore_warnings(day, contexts);
    }

    /// The warning flags to persist: the day they belong to and the
    /// contexts warned so far that day.
    #[must_use]
    pub fn warning_flags(&self) -> (Option<DayKey>, Vec<String>) {
        let contexts = self
            .evaluator
            .warned_contexts()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        (self.evaluator.warned_day(), contexts)
    }

    #[must_use]
    pub fn active_context(&self) -> Option<&str> {
        self.active_context.as_deref()
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.idle
    }

    #[must_use]
    pub const fn has_open_slice(&self) -> bool {
        self.slice.is_some()
    }

    /// Credits queued for retry after store failures.
    #[must_use]
    pub fn pending_credit_count(&self) -> usize {
        self.pending_credits.len()
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub const fn registry(&self) -> &LimitRegistry {
        &self.registry
    }

    pub const fn registry_mut(&mut self) -> &mut LimitRegistry {
        &mut self.registry
    }

    #[must_use]
    pub const fn schedule(&self) -> &DaySchedule {
        &self.schedule
    }

    /// The completion record of the most recently ended focus session.
    #[must_use]
    pub const fn last_focus_outcome(&self) -> Option<FocusOutcome> {
        self.last_focus_outcome
    }

    /// Resolves a navigation URL and activates the resulting context.
    /// Unresolvable URLs degrade to a deactivation.
    pub fn navigated(&mut self, url: &str, now: DateTime<Utc>, sink: &mut dyn EnforcementSink) {
        let context = resolve_context(url);
        if context.is_none() {
            tracing::debug!(url, "url resolved to no context");
        }
        self.context_activated(context.as_deref(), now, sink);
    }

    /// A context came to the foreground. `None` means no trackable
    /// context and is treated as a deactivation.
    pub fn context_activated(
        &mut self,
        context: Option<&str>,
        now: DateTime<Utc>,
        sink: &mut dyn EnforcementSink,
    ) {
        let Some(context) = context else {
            self.deactivated(now, sink);
            return;
        };

        self.expire_focus(now);
        if let Some(session) = &self.focus {
            let decision = session.decide(context, now);
            sink.on_focus_decision(context, decision);
        }

        if self.active_context.as_deref() == Some(context) {
            // Same context again (e.g. another tab on the same domain):
            // refresh the slice, but this is not a new visit.
            self.close_slice(now, sink);
            self.reopen_slice(now);
            return;
        }

        self.close_slice(now, sink);
        self.active_context = Some(context.to_string());
        if !self.idle {
            self.slice = Some(OpenSlice {
                context: context.to_string(),
                started_at: now,
            });
            let day = self.schedule.day_key(now);
            if let Err(err) = self.store.increment_visit(day, context, now) {
                tracing::warn!(context, %day, %err, "visit increment failed");
            }
        }
    }

    /// The idle state changed. Going idle closes the slice; the active
    /// context is retained. Coming back resumes crediting without
    /// counting a new visit.
    pub fn idle_changed(&mut self, idle: bool, now: DateTime<Utc>, sink: &mut dyn EnforcementSink) {
        if idle == self.idle {
            return;
        }
        if idle {
            self.close_slice(now, sink);
            self.idle = true;
        } else {
            self.idle = false;
            self.reopen_slice(now);
        }
    }

    /// No foreground context (window unfocused, non-trackable page).
    pub fn deactivated(&mut self, now: DateTime<Utc>, sink: &mut dyn EnforcementSink) {
        self.close_slice(now, sink);
        self.active_context = None;
    }

    /// Periodic timer input: credits the elapsed portion of a long-held
    /// slice and reopens it, so limits are enforceable mid-slice with
    /// bounded latency. Also reaps an expired focus session.
    pub fn tick(&mut self, now: DateTime<Utc>, sink: &mut dyn EnforcementSink) {
        self.expire_focus(now);
        self.close_slice(now, sink);
        self.reopen_slice(now);
    }

    /// Re-evaluates `context` against its limits and emits through the
    /// sink per the de-duplication policy. While a focus session is
    /// active, limit evaluation is superseded and this returns `Ok`.
    pub fn evaluate(
        &mut self,
        context: &str,
        now: DateTime<Utc>,
        sink: &mut dyn EnforcementSink,
    ) -> LimitStatus {
        if self.focus_active(now) {
            return LimitStatus::Ok;
        }
        let day = self.schedule.day_key(now);
        let evaluation = self
            .evaluator
            .evaluate_tracked(&self.store, &self.registry, day, context);
        if evaluation.should_emit() {
            tracing::info!(context, status = ?evaluation.status, "limit status emitted");
            sink.on_status(context, &evaluation.status);
        }
        evaluation.status
    }

    /// Starts a focus session. Rejects a non-positive duration and
    /// refuses to stack a second session on a running one.
    pub fn start_focus(
        &mut self,
        now: DateTime<Utc>,
        duration_ms: i64,
        blocked_patterns: Vec<String>,
        allowed_patterns: Vec<String>,
        sink: &mut dyn EnforcementSink,
    ) -> Result<(), FocusError> {
        self.expire_focus(now);
        if self.focus.is_some() {
            return Err(FocusError::AlreadyActive);
        }
        let session = FocusSession::start(now, duration_ms, blocked_patterns, allowed_patterns)?;
        // Decide the page already in the foreground right away.
        if let Some(context) = self.active_context.clone() {
            let decision = session.decide(&context, now);
            sink.on_focus_decision(&context, decision);
        }
        self.focus = Some(session);
        Ok(())
    }

    /// Ends the focus session, recording whether it was interrupted.
    pub fn end_focus(
        &mut self,
        now: DateTime<Utc>,
        interrupted: bool,
    ) -> Result<FocusOutcome, FocusError> {
        let session = self.focus.take().ok_or(FocusError::NotActive)?;
        let outcome = session.end(now, interrupted);
        tracing::info!(
            actual_ms = outcome.actual_duration_ms,
            completed = outcome.completed,
            interrupted,
            "focus session ended"
        );
        self.last_focus_outcome = Some(outcome);
        Ok(outcome)
    }

    #[must_use]
    pub fn focus_active(&self, now: DateTime<Utc>) -> bool {
        self.focus.as_ref().is_some_and(|s| s.is_active(now))
    }

    /// Reaps a session whose end time passed without an explicit end
    /// command (e.g. the ending timer was missed).
    fn expire_focus(&mut self, now: DateTime<Utc>) {
        if let Some(session) = self.focus.take_if(|s| !s.is_active(now)) {
            let outcome = session.end(now, false);
            tracing::info!(
                actual_ms = outcome.actual_duration_ms,
                completed = outcome.completed,
                "focus session expired"
            );
            self.last_focus_outcome = Some(outcome);
        }
    }

    /// Closes the open slice, crediting its elapsed time split across
    /// day boundaries, then pushes an evaluation for the credited
    /// context. Closing when no slice is open is a no-op, which makes
    /// cancellation paths idempotent.
    ///
    /// A credit the store rejects is queued and retried on the next
    /// write attempt; it is never dropped.
    fn close_slice(&mut self, now: DateTime<Utc>, sink: &mut dyn EnforcementSink) {
        self.flush_pending();
        let Some(slice) = self.slice.take() else {
            return;
        };

        for (day, delta_ms) in self.schedule.split_slice(slice.started_at, now) {
            if let Err(err) = self.store.credit_time(day, &slice.context, delta_ms, now) {
                tracing::warn!(
                    context = slice.context,
                    %day,
                    delta_ms,
                    %err,
                    "credit failed, queued for retry"
                );
                self.pending_credits.push(PendingCredit {
                    day,
                    context: slice.context.clone(),
                    delta_ms,
                    seen_at: now,
                });
            }
        }

        self.evaluate(&slice.context, now, sink);
    }

    /// Opens a fresh slice when the current state is eligible for
    /// crediting and none is open.
    fn reopen_slice(&mut self, now: DateTime<Utc>) {
        if self.idle || self.slice.is_some() {
            return;
        }
        if let Some(context) = &self.active_context {
            self.slice = Some(OpenSlice {
                context: context.clone(),
                started_at: now,
            });
        }
    }

    /// Retries credits that previously failed to write.
    fn flush_pending(&mut self) {
        if self.pending_credits.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_credits);
        for credit in pending {
            match self
                .store
                .credit_time(credit.day, &credit.context, credit.delta_ms, credit.seen_at)
            {
                Ok(_) => {
                    tracing::debug!(
                        context = credit.context,
                        day = %credit.day,
                        delta_ms = credit.delta_ms,
                        "retried credit succeeded"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        context = credit.context,
                        day = %credit.day,
                        %err,
                        "retried credit failed, keeping it queued"
                    );
                    self.pending_credits.push(credit);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    use crate::focus::FocusDecision;
    use crate::limits::{LimitConfig, LimitWindow};
    use crate::sink::RecordingSink;
    use crate::stats::ContextStat;
    use crate::store::{MemoryStore, RangeEntry, StoreError};

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(seconds)
    }

    fn day(d: u32) -> DayKey {
        DayKey::new(NaiveDate::from_ymd_opt(2025, 1, d).expect("valid test date"))
    }

    fn tracker() -> ActivityTracker<MemoryStore> {
        ActivityTracker::new(DaySchedule::default(), MemoryStore::new(), LimitRegistry::new())
    }

    fn tracker_with_limit(context: &str, config: LimitConfig) -> ActivityTracker<MemoryStore> {
        let mut registry = LimitRegistry::new();
        registry.set(context, config).unwrap();
        ActivityTracker::new(DaySchedule::default(), MemoryStore::new(), registry)
    }

    fn total(tracker: &ActivityTracker<MemoryStore>, d: DayKey, context: &str) -> i64 {
        tracker
            .store()
            .get_stat(d, context)
            .unwrap()
            .map_or(0, |s| s.total_time_ms)
    }

    fn visits(tracker: &ActivityTracker<MemoryStore>, d: DayKey, context: &str) -> i64 {
        tracker
            .store()
            .get_stat(d, context)
            .unwrap()
            .map_or(0, |s| s.visits)
    }

    #[test]
    fn credits_elapsed_time_on_context_switch() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.context_activated(Some("b.com"), ts(300), &mut sink);
        t.deactivated(ts(500), &mut sink);

        assert_eq!(total(&t, day(15), "a.com"), 300_000);
        assert_eq!(total(&t, day(15), "b.com"), 200_000);
        assert_eq!(t.active_context(), None);
        assert!(!t.has_open_slice());
    }

    #[test]
    fn no_double_counting_across_transitions() {
        // Credited totals over any transition sequence sum to the
        // elapsed wall-clock span while a slice was open.
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.context_activated(Some("b.com"), ts(120), &mut sink);
        t.context_activated(Some("a.com"), ts(180), &mut sink);
        t.tick(ts(400), &mut sink);
        t.context_activated(Some("c.com"), ts(450), &mut sink);
        t.deactivated(ts(600), &mut sink);

        let entries = t.store().get_range(None, day(15), day(15)).unwrap();
        let credited: i64 = entries.iter().map(|e| e.stat.total_time_ms).sum();
        assert_eq!(credited, 600_000);
    }

    #[test]
    fn visits_count_transitions_into_context_only() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        // Same domain again: not a new visit.
        t.context_activated(Some("a.com"), ts(60), &mut sink);
        // Tick is not a visit either.
        t.tick(ts(120), &mut sink);
        t.context_activated(Some("b.com"), ts(180), &mut sink);
        // Back to a.com: a second visit.
        t.context_activated(Some("a.com"), ts(240), &mut sink);

        assert_eq!(visits(&t, day(15), "a.com"), 2);
        assert_eq!(visits(&t, day(15), "b.com"), 1);
    }

    #[test]
    fn idle_time_is_never_credited() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.idle_changed(true, ts(300), &mut sink);
        // Nothing accrues while idle, even across a tick.
        t.tick(ts(500), &mut sink);
        t.idle_changed(false, ts(600), &mut sink);
        t.deactivated(ts(700), &mut sink);

        assert_eq!(total(&t, day(15), "a.com"), 400_000);
        // Idle retained the active context for the resume.
        assert_eq!(visits(&t, day(15), "a.com"), 1);
    }

    #[test]
    fn resume_from_idle_is_not_a_new_visit() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.idle_changed(true, ts(100), &mut sink);
        t.idle_changed(false, ts(200), &mut sink);

        assert_eq!(visits(&t, day(15), "a.com"), 1);
        assert!(t.has_open_slice());
    }

    #[test]
    fn activation_while_idle_counts_no_visit_and_opens_no_slice() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.idle_changed(true, ts(0), &mut sink);
        t.context_activated(Some("a.com"), ts(10), &mut sink);
        assert!(!t.has_open_slice());
        assert_eq!(visits(&t, day(15), "a.com"), 0);

        // Crediting starts when idle lifts.
        t.idle_changed(false, ts(100), &mut sink);
        t.deactivated(ts(160), &mut sink);
        assert_eq!(total(&t, day(15), "a.com"), 60_000);
    }

    #[test]
    fn duplicate_idle_events_are_no_ops() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.idle_changed(false, ts(50), &mut sink);
        assert!(t.has_open_slice());
        t.deactivated(ts(100), &mut sink);
        assert_eq!(total(&t, day(15), "a.com"), 100_000);
    }

    #[test]
    fn slice_spanning_midnight_splits_across_days() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        // 23:59:30 on Jan 15 through 00:00:30 on Jan 16.
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 23, 59, 30).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 30).unwrap();
        t.context_activated(Some("a.com"), start, &mut sink);
        t.deactivated(end, &mut sink);

        assert_eq!(total(&t, day(15), "a.com"), 30_000);
        assert_eq!(total(&t, day(16), "a.com"), 30_000);
        // The visit belongs to the day the activation happened.
        assert_eq!(visits(&t, day(15), "a.com"), 1);
        assert_eq!(visits(&t, day(16), "a.com"), 0);
    }

    #[test]
    fn unresolvable_url_degrades_to_deactivation() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.navigated("https://a.com/page", ts(0), &mut sink);
        assert_eq!(t.active_context(), Some("a.com"));

        t.navigated("chrome://extensions", ts(60), &mut sink);
        assert_eq!(t.active_context(), None);
        assert_eq!(total(&t, day(15), "a.com"), 60_000);
    }

    #[test]
    fn tick_enforces_limits_mid_slice() {
        // The end-to-end scenario: 10 minute daily limit, single
        // long-held slice, periodic ticks.
        let mut t = tracker_with_limit("a.com", LimitConfig::daily(600_000));
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);

        t.tick(ts(300), &mut sink);
        assert_eq!(total(&t, day(15), "a.com"), 300_000);
        // 5 of 10 minutes used: no emission yet.
        assert!(sink.statuses.is_empty());

        t.tick(ts(600), &mut sink);
        assert_eq!(total(&t, day(15), "a.com"), 600_000);
        let (context, status) = sink.statuses.last().expect("status emitted");
        assert_eq!(context, "a.com");
        assert_eq!(
            *status,
            LimitStatus::Exceeded {
                window: LimitWindow::Daily
            }
        );

        // Idle at the limit; a later tick credits nothing.
        t.idle_changed(true, ts(600), &mut sink);
        t.tick(ts(900), &mut sink);
        assert_eq!(total(&t, day(15), "a.com"), 600_000);
    }

    #[test]
    fn warning_fires_once_across_many_small_slices() {
        let mut t = tracker_with_limit("a.com", LimitConfig::daily(600_000));
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        // Accrue past the 90% mark (540s) in 60s ticks.
        for i in 1..=9 {
            t.tick(ts(i * 60), &mut sink);
        }

        let warnings: Vec<_> = sink
            .statuses
            .iter()
            .filter(|(_, s)| matches!(s, LimitStatus::Warning { .. }))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            *warnings[0],
            (
                "a.com".to_string(),
                LimitStatus::Warning { remaining_ms: 60_000 }
            )
        );
    }

    #[test]
    fn exceeded_reported_on_every_close() {
        let mut t = tracker_with_limit("a.com", LimitConfig::daily(60_000));
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.tick(ts(60), &mut sink);
        t.tick(ts(120), &mut sink);
        t.tick(ts(180), &mut sink);

        let exceeded = sink
            .statuses
            .iter()
            .filter(|(_, s)| matches!(s, LimitStatus::Exceeded { .. }))
            .count();
        assert_eq!(exceeded, 3);
    }

    #[test]
    fn focus_decisions_emitted_on_activation() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.start_focus(
            ts(10),
            1_500_000,
            vec!["*".to_string()],
            vec!["docs.rs".to_string()],
            &mut sink,
        )
        .expect("session starts");

        // The foreground page is decided immediately.
        assert_eq!(
            sink.decisions.last(),
            Some(&("a.com".to_string(), FocusDecision::Block))
        );

        t.context_activated(Some("docs.rs"), ts(60), &mut sink);
        assert_eq!(
            sink.decisions.last(),
            Some(&("docs.rs".to_string(), FocusDecision::Allow))
        );

        t.context_activated(Some("b.com"), ts(120), &mut sink);
        assert_eq!(
            sink.decisions.last(),
            Some(&("b.com".to_string(), FocusDecision::Block))
        );
    }

    #[test]
    fn focus_supersedes_limit_evaluation() {
        let mut t = tracker_with_limit("a.com", LimitConfig::daily(60_000));
        let mut sink = RecordingSink::new();

        t.start_focus(ts(0), 1_500_000, vec![], vec![], &mut sink)
            .unwrap();
        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.tick(ts(120), &mut sink);

        // Usage is past the limit, but focus replaces limit decisions.
        assert_eq!(total(&t, day(15), "a.com"), 120_000);
        assert!(sink.statuses.is_empty());

        // After the session expires, evaluation resumes.
        t.tick(ts(1_600), &mut sink);
        assert!(
            sink.statuses
                .iter()
                .any(|(_, s)| matches!(s, LimitStatus::Exceeded { .. }))
        );
    }

    #[test]
    fn tracking_continues_during_focus() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.start_focus(ts(0), 1_500_000, vec!["*".to_string()], vec![], &mut sink)
            .unwrap();
        t.context_activated(Some("a.com"), ts(0), &mut sink);
        t.deactivated(ts(90), &mut sink);

        assert_eq!(total(&t, day(15), "a.com"), 90_000);
    }

    #[test]
    fn second_focus_session_is_rejected_while_one_runs() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.start_focus(ts(0), 1_500_000, vec![], vec![], &mut sink)
            .unwrap();
        assert_eq!(
            t.start_focus(ts(10), 60_000, vec![], vec![], &mut sink),
            Err(FocusError::AlreadyActive)
        );

        // After expiry, a new one may start.
        assert!(
            t.start_focus(ts(1_500), 60_000, vec![], vec![], &mut sink)
                .is_ok()
        );
    }

    #[test]
    fn tick_reaps_expired_focus_session() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.start_focus(ts(0), 1_500_000, vec![], vec![], &mut sink)
            .unwrap();
        assert!(t.focus_active(ts(100)));

        t.tick(ts(1_600), &mut sink);
        assert!(!t.focus_active(ts(1_600)));
        let outcome = t.last_focus_outcome().expect("outcome recorded");
        assert_eq!(outcome.actual_duration_ms, 1_500_000);
        assert!(outcome.completed);
    }

    #[test]
    fn explicit_focus_end_records_interruption() {
        let mut t = tracker();
        let mut sink = RecordingSink::new();

        t.start_focus(ts(0), 1_500_000, vec![], vec![], &mut sink)
            .unwrap();
        let outcome = t.end_focus(ts(300), true).expect("session was active");
        assert_eq!(outcome.actual_duration_ms, 300_000);
        assert!(!outcome.completed);

        assert_eq!(t.end_focus(ts(310), false), Err(FocusError::NotActive));
    }

    /// Store wrapper that fails writes on demand.
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_writes: false,
            }
        }
    }

    impl AggregateStore for FlakyStore {
        fn credit_time(
            &mut self,
            day: DayKey,
            context: &str,
            delta_ms: i64,
            now: DateTime<Utc>,
        ) -> Result<ContextStat, StoreError> {
            if self.fail_writes {
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
            self.inner.credit_time(day, context, delta_ms, now)
        }

        fn increment_visit(
            &mut self,
            day: DayKey,
            context: &str,
            now: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
            self.inner.increment_visit(day, context, now)
        }

        fn get_stat(&self, day: DayKey, context: &str) -> Result<Option<ContextStat>, StoreError> {
            self.inner.get_stat(day, context)
        }

        fn get_range(
            &self,
            context: Option<&str>,
            first: DayKey,
            last: DayKey,
        ) -> Result<Vec<RangeEntry>, StoreError> {
            self.inner.get_range(context, first, last)
        }
    }

    #[test]
    fn failed_credit_is_retried_not_dropped() {
        let mut t = ActivityTracker::new(
            DaySchedule::default(),
            FlakyStore::new(),
            LimitRegistry::new(),
        );
        let mut sink = RecordingSink::new();

        t.context_activated(Some("a.com"), ts(0), &mut sink);

        // The close attempt fails; the credit is queued, not lost.
        t.store_mut().fail_writes = true;
        t.context_activated(Some("b.com"), ts(300), &mut sink);
        assert_eq!(t.pending_credit_count(), 1);
        assert_eq!(
            t.store().get_stat(day(15), "a.com").unwrap().map_or(0, |s| s.total_time_ms),
            0
        );

        // Store recovers; the next close flushes the queue first.
        t.store_mut().fail_writes = false;
        t.deactivated(ts(500), &mut sink);
        assert_eq!(t.pending_credit_count(), 0);
        let a = t.store().get_stat(day(15), "a.com").unwrap().unwrap();
        let b = t.store().get_stat(day(15), "b.com").unwrap().unwrap();
        assert_eq!(a.total_time_ms, 300_000);
        assert_eq!(b.total_time_ms, 200_000);
    }

    #[test]
    fn retried_credit_keeps_original_context_and_day() {
        let mut t = ActivityTracker::new(
            DaySchedule::default(),
            FlakyStore::new(),
            LimitRegistry::new(),
        );
        let mut sink = RecordingSink::new();

        // Slice spans midnight and the credit fails at close.
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 23, 59, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 16, 0, 1, 0).unwrap();
        t.context_activated(Some("a.com"), start, &mut sink);
        t.store_mut().fail_writes = true;
        t.context_activated(Some("b.com"), end, &mut sink);
        assert_eq!(t.pending_credit_count(), 2);

        t.store_mut().fail_writes = false;
        t.tick(end + Duration::seconds(60), &mut sink);

        assert_eq!(
            t.store().get_stat(day(15), "a.com").unwrap().unwrap().total_time_ms,
            60_000
        );
        assert_eq!(
            t.store().get_stat(day(16), "a.com").unwrap().unwrap().total_time_ms,
            60_000
        );
    }

    #[test]
    fn warning_flags_survive_restart_via_restore() {
        let mut registry = LimitRegistry::new();
        registry.set("a.com", LimitConfig::daily(600_000)).unwrap();

        let mut store = MemoryStore::new();
        store.credit_time(day(15), "a.com", 550_000, ts(0)).unwrap();

        let mut t = ActivityTracker::new(DaySchedule::default(), store, registry);
        t.restore_warnings(day(15), vec!["a.com".to_string()]);

        let mut sink = RecordingSink::new();
        t.evaluate("a.com", ts(100), &mut sink);
        // Already warned before the restart: no re-emission.
        assert!(sink.statuses.is_empty());

        let (flag_day, contexts) = t.warning_flags();
        assert_eq!(flag_day, Some(day(15)));
        assert_eq!(contexts, vec!["a.com".to_string()]);
    }
}
