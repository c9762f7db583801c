//! Close status codes and close frame payloads.

use std::fmt;

use super::FrameError;
use crate::byte_order::{read_network_u16, write_network_u16};

/// Longest reason that fits a control frame after the two-byte status.
pub const MAX_REASON_LEN: usize = 123;

/// Status code carried by a close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose of the connection was fulfilled.
    Normal,
    /// 1001: the endpoint is going away, e.g. server shutdown.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: unsupported data type.
    Unsupported,
    /// 1005: no status was present. Never sent.
    NoStatus,
    /// 1006: closed without a close frame. Never sent.
    Abnormal,
    /// 1007: payload inconsistent with the message type.
    InvalidPayload,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big to process.
    TooBig,
    /// 1010: a required extension was not negotiated.
    MandatoryExtension,
    /// 1011: unexpected condition on the server.
    UnexpectedCondition,
    /// 1012: service restart.
    ServiceRestart,
    /// 1013: try again later.
    TryAgainLater,
    /// 1015: transport security handshake failure. Never sent.
    TlsHandshake,
    /// 3000-4999: registered or private application codes.
    Application(u16),
    /// Any other value; not valid on the wire.
    Other(u16),
}

impl CloseCode {
    /// Whether the code may appear in a close frame.
    #[must_use]
    pub fn is_sendable(self) -> bool {
        match self {
            Self::NoStatus | Self::Abnormal | Self::TlsHandshake | Self::Other(_) => false,
            Self::Application(code) => (3000..=4999).contains(&code),
            _ => true,
        }
    }

    /// Code to put on the wire; unsendable codes become
    /// [`CloseCode::ProtocolError`].
    #[must_use]
    pub fn on_wire(self) -> Self {
        if self.is_sendable() {
            self
        } else {
            Self::ProtocolError
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::Unsupported,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::TooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::UnexpectedCondition,
            1012 => Self::ServiceRestart,
            1013 => Self::TryAgainLater,
            1015 => Self::TlsHandshake,
            3000..=4999 => Self::Application(code),
            _ => Self::Other(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::UnexpectedCondition => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Application(code) | CloseCode::Other(code) => code,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", u16::from(*self)) }
}

/// Status and reason of a closed connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// Status code.
    pub code: CloseCode,
    /// Human readable reason, at most [`MAX_REASON_LEN`] bytes on the wire.
    pub reason: String,
}

impl CloseReason {
    /// Create a close reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure without a reason.
    #[must_use]
    pub fn normal() -> Self { Self::new(CloseCode::Normal, "") }

    /// Encode as a close frame payload.
    ///
    /// Unsendable codes are replaced by 1002 and the reason is truncated on a
    /// character boundary to fit a control frame.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut end = self.reason.len().min(MAX_REASON_LEN);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut payload = Vec::with_capacity(2 + end);
        payload.extend_from_slice(&write_network_u16(self.code.on_wire().into()));
        payload.extend_from_slice(&self.reason.as_bytes()[..end]);
        payload
    }

    /// Decode a received close frame payload.
    ///
    /// An empty payload yields `None` (no status).
    ///
    /// # Errors
    ///
    /// Fails for a one-byte payload or a code that may not be sent, and for a
    /// reason that is not valid UTF-8.
    pub fn from_payload(payload: &[u8]) -> Result<Option<Self>, FrameError> {
        let (code, reason) = match payload {
            [] => return Ok(None),
            [_] => return Err(FrameError::ProtocolViolation("truncated close status")),
            [hi, lo, reason @ ..] => (CloseCode::from(read_network_u16([*hi, *lo])), reason),
        };
        if !code.is_sendable() {
            return Err(FrameError::ProtocolViolation("invalid close status"));
        }
        let reason = std::str::from_utf8(reason)
            .map_err(|_| FrameError::InvalidPayload("close reason is not valid UTF-8"))?;
        Ok(Some(Self::new(code, reason)))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}
