//! Transition of a connection into framed-duplex mode.
//!
//! The [`UpgradeCoordinator`] owns an upgraded connection: it wires a
//! [`FrameAssembler`](crate::frame::FrameAssembler) to the inbound side and a
//! [`FrameSender`] to the outbound side, delivers messages to the
//! application [`Endpoint`] and drives the closing handshake.

mod coordinator;
mod endpoint;
mod error;
mod handshake;
mod registry;
mod sender;
mod session;

pub use coordinator::UpgradeCoordinator;
pub use endpoint::Endpoint;
pub use error::{SendError, UpgradeError};
pub use handshake::{HandshakeContext, SessionMetadata};
pub use registry::SessionRegistry;
pub use sender::{FlushStatus, FrameSender};
pub use session::{Session, SessionId, WriteNotifier};

/// Lifecycle phase of an upgraded connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// Waiting for `init`.
    PreInit,
    /// Messages flow in both directions.
    Open,
    /// A close frame was sent; waiting for the peer's reply.
    Closing,
    /// The connection is finished.
    Closed,
}

impl ConnectionPhase {
    /// Lower-case name used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreInit => "pre-init",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// What the connection layer should do with the socket after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    /// Keep polling the socket for this connection.
    Upgraded,
    /// Release the socket.
    Closed,
}

#[cfg(test)]
mod tests;
