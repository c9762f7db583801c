//! Application-level messages.

use bytes::Bytes;

use super::CloseReason;

/// A complete message delivered to or sent by an endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Binary(Bytes),
    /// Keep-alive request.
    Ping(Bytes),
    /// Keep-alive response.
    Pong(Bytes),
    /// Close frame, with its status when one was present.
    Close(Option<CloseReason>),
}

impl Message {
    /// Text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self { Self::Text(text.into()) }

    /// Binary message.
    #[must_use]
    pub fn binary(bytes: impl Into<Bytes>) -> Self { Self::Binary(bytes.into()) }

    /// Whether this is a control message.
    #[must_use]
    pub fn is_control(&self) -> bool { matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close(_)) }

    /// Payload length before any transform.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) | Self::Ping(bytes) | Self::Pong(bytes) => bytes.len(),
            Self::Close(reason) => reason.as_ref().map_or(0, |r| 2 + r.reason.len()),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
