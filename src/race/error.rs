//! Errors returned by a race

use super::scope::CancelReason;
use thiserror::Error;

/// Failure outcome of a race, generic over the operations' error type
///
/// When several causes apply, the one reported follows this precedence: the
/// last operation error, then an aborted task, then cancellation.
#[derive(Debug, Error)]
pub enum RaceError<E> {
    /// No operations were supplied
    #[error("no candidate operations to race")]
    NoCandidates,

    /// Every operation that ran failed; holds the most recently recorded error
    #[error("all operations failed, last error: {0}")]
    AllFailed(#[source] E),

    /// The scope was cancelled before any operation produced an outcome
    #[error("race cancelled before any operation completed: {0}")]
    Cancelled(CancelReason),

    /// The only outcomes were tasks that panicked
    #[error("operation `{operation}` terminated abnormally")]
    TaskAborted { operation: String },
}

impl<E> RaceError<E> {
    /// The last operation error, if this is an all-failed outcome
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::AllFailed(error) => Some(error),
            _ => None,
        }
    }

    /// Consume and return the last operation error, if any
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::AllFailed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_no_candidates(&self) -> bool {
        matches!(self, Self::NoCandidates)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
