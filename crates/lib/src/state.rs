use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a transaction attempt, as recorded in its ATR entry.
///
/// The state is monotonic along `NotStarted < Pending < {Aborted, Committed}
/// < Completed`; there are no backward transitions, and `Aborted` and
/// `Committed` are mutually exclusive branches of the same rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    NotStarted,
    Pending,
    Aborted,
    Committed,
    Completed,
}

impl AttemptState {
    fn rank(&self) -> u8 {
        match self {
            AttemptState::NotStarted => 0,
            AttemptState::Pending => 1,
            AttemptState::Aborted | AttemptState::Committed => 2,
            AttemptState::Completed => 3,
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic order.
    ///
    /// Transitions may skip ranks forward; equal-rank moves (including
    /// `Aborted` ↔ `Committed`) and backward moves are rejected.
    pub fn can_transition_to(&self, next: AttemptState) -> bool {
        next.rank() > self.rank()
    }

    /// `Aborted` and `Completed` admit no further work on the attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Aborted | AttemptState::Completed)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptState::NotStarted => "NOT_STARTED",
            AttemptState::Pending => "PENDING",
            AttemptState::Aborted => "ABORTED",
            AttemptState::Committed => "COMMITTED",
            AttemptState::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::AttemptState::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(NotStarted.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Committed));
        assert!(Pending.can_transition_to(Aborted));
        assert!(Committed.can_transition_to(Completed));
        assert!(NotStarted.can_transition_to(Aborted));
        assert!(Pending.can_transition_to(Completed));
    }

    #[test]
    fn backward_and_sibling_transitions_rejected() {
        assert!(!Pending.can_transition_to(NotStarted));
        assert!(!Committed.can_transition_to(Pending));
        assert!(!Committed.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Committed));
        assert!(!Completed.can_transition_to(Committed));
        for s in [NotStarted, Pending, Aborted, Committed, Completed] {
            assert!(!s.can_transition_to(s));
        }
    }

    #[test]
    fn wire_names_are_screaming_snake() {
        let json = serde_json::to_string(&NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
        let back: super::AttemptState = serde_json::from_str("\"COMMITTED\"").unwrap();
        assert_eq!(back, Committed);
    }
}
