//! Per-operation phase tracking.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Phase of a money-movement operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    /// Operation accepted (or restarted after a conflict).
    Started,
    /// Checking arguments before any store access.
    Validating,
    /// Reading accounts inside the unit.
    Reading,
    /// Computing new balances.
    Computing,
    /// Issuing conditional balance writes.
    Writing,
    /// Appending the ledger record.
    Appending,
    /// Committing the unit.
    Committing,
    /// Unit committed; terminal.
    Committed,
    /// Unit aborted by deadline or timeout.
    Aborted,
    /// Unit lost a concurrent write race.
    Conflict,
    /// Operation failed; terminal.
    Failed,
}

impl OperationPhase {
    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationPhase::Committed | OperationPhase::Failed)
    }

    /// Get valid next phases from current phase.
    pub fn valid_transitions(&self) -> &[OperationPhase] {
        use OperationPhase::*;
        match self {
            Started => &[Validating, Reading, Failed],
            Validating => &[Reading, Failed],
            Reading => &[Computing, Conflict, Aborted, Failed],
            Computing => &[Writing, Conflict, Aborted, Failed],
            Writing => &[Appending, Conflict, Aborted, Failed],
            Appending => &[Committing, Conflict, Aborted, Failed],
            Committing => &[Committed, Conflict, Aborted, Failed],
            Conflict => &[Started, Aborted, Failed],
            Aborted => &[Started, Failed],
            Committed => &[],
            Failed => &[],
        }
    }

    /// Check if transition to given phase is valid.
    pub fn can_transition_to(&self, next: OperationPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationPhase::Started => "started",
            OperationPhase::Validating => "validating",
            OperationPhase::Reading => "reading",
            OperationPhase::Computing => "computing",
            OperationPhase::Writing => "writing",
            OperationPhase::Appending => "appending",
            OperationPhase::Committing => "committing",
            OperationPhase::Committed => "committed",
            OperationPhase::Aborted => "aborted",
            OperationPhase::Conflict => "conflict",
            OperationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct PhaseLog {
    phase: OperationPhase,
    attempts: u32,
    history: Vec<OperationPhase>,
}

/// Shared handle recording the phases an operation passes through.
///
/// Cloned into each unit attempt so the unit body can report progress.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    operation: &'static str,
    log: Arc<Mutex<PhaseLog>>,
}

impl PhaseTracker {
    /// Start tracking a new operation in [`OperationPhase::Started`].
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            log: Arc::new(Mutex::new(PhaseLog {
                phase: OperationPhase::Started,
                attempts: 0,
                history: vec![OperationPhase::Started],
            })),
        }
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&self, next: OperationPhase) -> bool {
        let mut log = self.log.lock();
        if !log.phase.can_transition_to(next) {
            warn!(
                operation = self.operation,
                from = %log.phase,
                to = %next,
                "Invalid phase transition"
            );
            return false;
        }
        if next == OperationPhase::Reading {
            log.attempts += 1;
        }
        trace!(operation = self.operation, from = %log.phase, to = %next, "Phase");
        log.phase = next;
        log.history.push(next);
        true
    }

    /// Current phase.
    pub fn phase(&self) -> OperationPhase {
        self.log.lock().phase
    }

    /// Number of unit attempts so far.
    pub fn attempts(&self) -> u32 {
        self.log.lock().attempts
    }

    /// Every phase entered, in order.
    pub fn history(&self) -> Vec<OperationPhase> {
        self.log.lock().history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationPhase::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Started, Validating, Reading, Computing, Writing, Appending, Committing, Committed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Committed.is_terminal());
        assert!(Committed.valid_transitions().is_empty());
    }

    #[test]
    fn test_conflict_loops_back_to_started() {
        assert!(Writing.can_transition_to(Conflict));
        assert!(Conflict.can_transition_to(Started));
        assert!(Started.can_transition_to(Reading));
        assert!(!Validating.can_transition_to(Conflict));
        assert!(!Failed.can_transition_to(Started));
    }

    #[test]
    fn test_tracker_counts_attempts_and_rejects_invalid() {
        let tracker = PhaseTracker::new("top_up");
        assert!(tracker.advance(Validating));
        assert!(tracker.advance(Reading));
        assert!(tracker.advance(Conflict));
        assert!(tracker.advance(Started));
        assert!(tracker.advance(Reading));
        assert!(!tracker.advance(Committed));

        assert_eq!(tracker.attempts(), 2);
        assert_eq!(tracker.phase(), Reading);
        assert_eq!(
            tracker.history(),
            vec![Started, Validating, Reading, Conflict, Started, Reading]
        );
    }
}
