//! Errors raised by the asynchronous request state machine.

use thiserror::Error;

use super::AsyncPhase;

/// Misuse of an [`AsyncRequestState`](super::AsyncRequestState).
///
/// These errors are always surfaced to the caller; the state machine never
/// swallows them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AsyncStateError {
    /// The operation is not valid in the current phase.
    #[error("cannot {operation} while the request is {phase}")]
    IllegalState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Phase the request was in.
        phase: AsyncPhase,
    },
    /// A dispatch is already pending.
    #[error("a dispatch is already pending for this request")]
    DuplicateDispatch,
    /// The routing layer cannot dispatch to the target.
    #[error("dispatch target {0:?} is not supported")]
    UnsupportedDispatch(String),
    /// A task was started but no executor is configured.
    #[error("no task executor is configured for this request")]
    NoExecutor,
}
