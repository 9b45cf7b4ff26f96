// Error type shared by the selector, the transfer planner, and the lineup picker.

use std::time::Duration;

use thiserror::Error;

use crate::squad::SquadError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error("no feasible squad: {reason}")]
    InfeasibleSelection { reason: String },

    #[error("squad size violation: expected {expected} players, found {actual}")]
    SquadSizeViolation { expected: usize, actual: usize },

    #[error("cannot fill lineup slot {position}: need {required}, squad has {available}")]
    LineupUnderfilled {
        position: String,
        required: usize,
        available: usize,
    },

    #[error("squad invariant broken: {0}")]
    InvalidSquad(SquadError),

    #[error("search stopped after {nodes} nodes ({elapsed:?})")]
    SelectionTimeout { elapsed: Duration, nodes: usize },
}

impl SelectionError {
    pub fn infeasible(reason: impl Into<String>) -> Self {
        SelectionError::InfeasibleSelection {
            reason: reason.into(),
        }
    }

    /// Whether a caller may retry with a cheaper strategy.
    ///
    /// Only a bounded search running out of budget qualifies; infeasibility
    /// and invariant breaks will not go away on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SelectionError::SelectionTimeout { .. })
    }
}

impl From<SquadError> for SelectionError {
    fn from(err: SquadError) -> Self {
        match err {
            SquadError::WrongSize { expected, actual } => {
                SelectionError::SquadSizeViolation { expected, actual }
            }
            other => SelectionError::InvalidSquad(other),
        }
    }
}
