//! Errors raised while decoding or encoding frames.

use std::io;

use thiserror::Error;

use super::{CloseCode, CloseReason};

/// Failure in the framed-duplex codec.
///
/// Every variant maps onto the close status sent to the peer through
/// [`FrameError::close_reason`].
#[derive(Debug, Error)]
pub enum FrameError {
    /// Malformed frame, bad masking or out-of-order fragments.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// The message would exceed the configured maximum.
    #[error("message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooBig {
        /// Size that triggered the guard.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The payload is not valid for its message type.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    /// A negotiated transform rejected its input.
    #[error("transform failed: {0}")]
    Transform(#[source] io::Error),
    /// The socket facade reported an I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The peer closed the stream without a close frame.
    #[error("unexpected end of stream")]
    EndOfStream,
}

impl FrameError {
    /// Close status matching the failure.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::ProtocolViolation(_) | Self::Transform(_) => CloseCode::ProtocolError,
            Self::MessageTooBig { .. } => CloseCode::TooBig,
            Self::InvalidPayload(_) => CloseCode::InvalidPayload,
            Self::Transport(_) | Self::EndOfStream => CloseCode::Abnormal,
        }
    }

    /// Close reason sent to the peer, when one can still be sent.
    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        let reason = match self {
            Self::MessageTooBig { .. } => "message too big",
            Self::ProtocolViolation(detail) | Self::InvalidPayload(detail) => *detail,
            Self::Transform(_) => "transform failed",
            Self::Transport(_) | Self::EndOfStream => "",
        };
        CloseReason::new(self.close_code(), reason)
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol",
            Self::MessageTooBig { .. } => "too_big",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Transform(_) => "transform",
            Self::Transport(_) => "transport",
            Self::EndOfStream => "eof",
        }
    }
}
