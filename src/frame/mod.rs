//! Framed-duplex wire format.
//!
//! This module implements the frame layer used after a connection upgrade:
//! header parsing and encoding, payload masking, close statuses, negotiated
//! payload transforms (including permessage-deflate), the incremental
//! [`FrameAssembler`] for the inbound side and the [`FrameEncoder`] for the
//! outbound side.

mod assembler;
mod close;
mod deflate;
mod encoder;
mod error;
mod header;
mod mask;
mod message;
mod transform;

pub use assembler::{FrameAssembler, ReadStatus};
pub use close::{CloseCode, CloseReason, MAX_REASON_LEN};
pub use deflate::{DeflateConfig, DeflateTransform, PERMESSAGE_DEFLATE};
pub use encoder::FrameEncoder;
pub use error::FrameError;
pub use header::{FrameHeader, MAX_CONTROL_PAYLOAD, MAX_HEADER_LEN, OpCode, RSV1};
pub use mask::{apply_mask, random_key};
pub use message::Message;
pub use transform::{
    FragmentInfo,
    InboundChain,
    InboundTransform,
    OutboundChain,
    OutboundTransform,
    Transform,
    TransformChain,
};

/// Side of the connection a codec runs on.
///
/// Servers require inbound frames to be masked and never mask their own;
/// clients do the opposite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepting side.
    Server,
    /// Connecting side.
    Client,
}

impl Role {
    /// The role of the peer.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Server => Self::Client,
            Self::Client => Self::Server,
        }
    }
}
