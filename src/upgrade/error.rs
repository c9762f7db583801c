//! Errors raised by the upgrade coordinator and session senders.

use thiserror::Error;

use super::ConnectionPhase;
use crate::{frame::FrameError, panic::CallbackFailure};

/// Failure of an upgraded connection.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// `init` was called before `pre_init` supplied the handshake.
    #[error("upgrade coordinator used before pre-initialisation")]
    NotInitialized,
    /// The operation is not valid in the current phase.
    #[error("cannot {operation} while the connection is {phase}")]
    IllegalState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Phase the connection was in.
        phase: ConnectionPhase,
    },
    /// Decoding, encoding or transport failure.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// An endpoint callback failed or panicked.
    #[error("endpoint callback failed: {0}")]
    Endpoint(CallbackFailure),
}

/// Failure to queue an outbound message on a session.
#[derive(Debug, Error)]
pub enum SendError {
    /// The session is closing or closed.
    #[error("session is closed")]
    Closed,
    /// Queuing the message would exceed the send buffer limit.
    #[error("send buffer full: {queued} bytes queued, limit {limit}")]
    BufferFull {
        /// Bytes already queued.
        queued: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The message could not be encoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
