//! The enforcement sink seam.

use crate::focus::FocusDecision;
use crate::limits::LimitStatus;

/// Receives limit statuses and focus decisions from the engine.
///
/// Implementations perform the visible action (redirect a tab, show a
/// notification); the engine only decides. `on_status` is invoked for
/// deduplicated warnings and for every `Exceeded` evaluation, so block
/// handling must be idempotent ("ensure blocked", not "block").
pub trait EnforcementSink {
    fn on_status(&mut self, context: &str, status: &LimitStatus);

    fn on_focus_decision(&mut self, context: &str, decision: FocusDecision);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EnforcementSink for NullSink {
    fn on_status(&mut self, _context: &str, _status: &LimitStatus) {}

    fn on_focus_decision(&mut self, _context: &str, _decision: FocusDecision) {}
}

/// Sink that records everything it receives, in order.
///
/// Used by tests and by the replay command's end-of-run summary.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub statuses: Vec<(String, LimitStatus)>,
    pub decisions: Vec<(String, FocusDecision)>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnforcementSink for RecordingSink {
    fn on_status(&mut self, context: &str, status: &LimitStatus) {
        self.statuses.push((context.to_string(), *status));
    }

    fn on_focus_decision(&mut self, context: &str, decision: FocusDecision) {
        self.decisions.push((context.to_string(), decision));
    }
}
