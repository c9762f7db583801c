//! Canonical error and result types for the crate.
//!
//! Each component keeps its own error enum close to the code that raises it.
//! [`CoreError`] folds them into the single taxonomy exposed to embedding
//! layers, so callers can match on the kind of failure without caring which
//! component produced it.

use std::io;

use thiserror::Error;

use crate::{
    async_request::AsyncStateError,
    config::ConfigError,
    frame::FrameError,
    upgrade::{SendError, UpgradeError},
};

/// Top-level error type exposed by `duplexwire`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The operation is not valid for the current lifecycle phase.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// A dispatch was requested while another one is still pending.
    #[error("a dispatch is already pending")]
    DuplicateDispatch,
    /// The dispatch target cannot be resolved by the routing layer.
    #[error("dispatch target {0:?} is not supported")]
    UnsupportedDispatch(String),
    /// The peer violated the framing protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// An inbound message exceeded the configured maximum.
    #[error("message too big: {size} bytes > {limit} bytes")]
    MessageTooBig {
        /// Size that triggered the guard.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// `init` was called before the handshake metadata was supplied.
    #[error("upgrade coordinator used before pre-initialisation")]
    NotInitialized,
    /// An endpoint callback failed.
    #[error("endpoint callback failed: {0}")]
    Callback(String),
    /// I/O failure reported by the socket facade.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Returns true when the error signals misuse of a state machine.
    #[must_use]
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_)
                | Self::DuplicateDispatch
                | Self::UnsupportedDispatch(_)
                | Self::NotInitialized
        )
    }
}

impl From<AsyncStateError> for CoreError {
    fn from(error: AsyncStateError) -> Self {
        match error {
            AsyncStateError::IllegalState { .. } => Self::IllegalState(error.to_string()),
            AsyncStateError::DuplicateDispatch => Self::DuplicateDispatch,
            AsyncStateError::UnsupportedDispatch(target) => Self::UnsupportedDispatch(target),
            AsyncStateError::NoExecutor => Self::IllegalState(error.to_string()),
        }
    }
}

impl From<FrameError> for CoreError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::MessageTooBig { size, limit } => Self::MessageTooBig { size, limit },
            FrameError::Transport(io) => Self::Transport(io),
            FrameError::EndOfStream => {
                Self::Transport(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
            }
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<UpgradeError> for CoreError {
    fn from(error: UpgradeError) -> Self {
        match error {
            UpgradeError::NotInitialized => Self::NotInitialized,
            UpgradeError::IllegalState { .. } => Self::IllegalState(error.to_string()),
            UpgradeError::Frame(frame) => frame.into(),
            UpgradeError::Endpoint(failure) => Self::Callback(failure.to_string()),
        }
    }
}

impl From<SendError> for CoreError {
    fn from(error: SendError) -> Self {
        match error {
            SendError::Frame(frame) => frame.into(),
            other => Self::IllegalState(other.to_string()),
        }
    }
}

/// Canonical result alias used by `duplexwire` public APIs.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::async_request::AsyncPhase;

    #[rstest]
    fn async_errors_map_onto_taxonomy() {
        let err: CoreError = AsyncStateError::DuplicateDispatch.into();
        assert!(matches!(err, CoreError::DuplicateDispatch));

        let err: CoreError = AsyncStateError::IllegalState {
            operation: "start",
            phase: AsyncPhase::Ended,
        }
        .into();
        assert!(err.is_lifecycle_error());
        assert!(err.to_string().contains("start"));
    }

    #[rstest]
    fn frame_errors_map_onto_taxonomy() {
        let err: CoreError = FrameError::MessageTooBig { size: 11, limit: 10 }.into();
        assert!(matches!(err, CoreError::MessageTooBig { size: 11, limit: 10 }));

        let err: CoreError = FrameError::ProtocolViolation("unmasked frame").into();
        assert!(matches!(err, CoreError::ProtocolViolation(_)));
        assert!(!err.is_lifecycle_error());
    }

    #[rstest]
    fn not_initialised_is_a_lifecycle_error() {
        let err: CoreError = UpgradeError::NotInitialized.into();
        assert!(matches!(err, CoreError::NotInitialized));
        assert!(err.is_lifecycle_error());
    }
}
