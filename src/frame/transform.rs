//! Negotiated payload transforms.
//!
//! A [`Transform`] is one negotiated extension. Once the handshake completes
//! the chain is split into an inbound half, applied in registration order,
//! and an outbound half, applied in reverse order so that the two stay
//! mirrored. Control frames never pass through transforms.

use bytes::Bytes;

use super::{FrameError, OpCode};

/// Frame attributes visible to a transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Opcode of the message the payload belongs to.
    pub opcode: OpCode,
    /// Reserved bits of the message's first frame.
    pub rsv: u8,
    /// Whether this is the final frame of the message.
    pub fin: bool,
}

/// Decoding half of a transform.
pub trait InboundTransform: Send {
    /// Reserved bits the transform gives meaning to.
    fn rsv_bits(&self) -> u8 { 0 }

    /// Largest payload this stage may receive for a message that decodes to
    /// `decoded` bytes.
    ///
    /// Only consulted for messages carrying one of [`rsv_bits`](Self::rsv_bits).
    fn max_encoded_len(&self, decoded: usize) -> usize { decoded }

    /// Decode the payload of one data frame.
    ///
    /// The output may be empty while the transform buffers input. It must
    /// not grow beyond `budget` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MessageTooBig`] with the produced size when the
    /// budget is exceeded, or [`FrameError::Transform`] for corrupt input.
    fn decode(&mut self, info: &FragmentInfo, payload: Bytes, budget: usize) -> Result<Bytes, FrameError>;
}

/// Encoding half of a transform.
pub trait OutboundTransform: Send {
    /// Encode a whole message payload, setting any reserved bits it claims
    /// on `info`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Transform`] if encoding fails.
    fn encode(&mut self, info: &mut FragmentInfo, payload: Bytes) -> Result<Bytes, FrameError>;
}

/// A negotiated extension.
pub trait Transform: Send {
    /// Extension name as negotiated in the handshake.
    fn name(&self) -> &str;

    /// Split into independently owned decoding and encoding halves.
    fn into_halves(self: Box<Self>) -> (Box<dyn InboundTransform>, Box<dyn OutboundTransform>);
}

/// Ordered set of negotiated transforms.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append `transform`.
    #[must_use]
    pub fn with(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Names of the registered transforms in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> { self.transforms.iter().map(|t| t.name().to_owned()).collect() }

    /// Whether no transforms are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.transforms.is_empty() }

    /// Split into mirrored inbound and outbound chains.
    #[must_use]
    pub fn split(self) -> (InboundChain, OutboundChain) {
        let (inbound, mut outbound): (Vec<_>, Vec<_>) =
            self.transforms.into_iter().map(|t| t.into_halves()).unzip();
        outbound.reverse();
        (InboundChain { stages: inbound }, OutboundChain { stages: outbound })
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.transforms.iter().map(|t| t.name())).finish()
    }
}

/// Decoding stages applied in registration order.
#[derive(Default)]
pub struct InboundChain {
    stages: Vec<Box<dyn InboundTransform>>,
}

impl InboundChain {
    /// Reserved bits claimed by any stage.
    #[must_use]
    pub fn rsv_mask(&self) -> u8 { self.stages.iter().fold(0, |bits, s| bits | s.rsv_bits()) }

    /// Largest wire payload of a message decoding to `decoded` bytes whose
    /// first frame carries `rsv`.
    #[must_use]
    pub fn max_encoded_len(&self, rsv: u8, decoded: usize) -> usize {
        self.stages
            .iter()
            .rev()
            .filter(|stage| stage.rsv_bits() & rsv != 0)
            .fold(decoded, |len, stage| stage.max_encoded_len(len))
    }

    /// Decode one data frame payload through every stage.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn decode(&mut self, info: &FragmentInfo, payload: Bytes, budget: usize) -> Result<Bytes, FrameError> {
        self.stages
            .iter_mut()
            .try_fold(payload, |payload, stage| stage.decode(info, payload, budget))
    }
}

/// Encoding stages applied in reverse registration order.
#[derive(Default)]
pub struct OutboundChain {
    stages: Vec<Box<dyn OutboundTransform>>,
}

impl OutboundChain {
    /// Encode a message payload through every stage.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn encode(&mut self, info: &mut FragmentInfo, payload: Bytes) -> Result<Bytes, FrameError> {
        self.stages
            .iter_mut()
            .try_fold(payload, |payload, stage| stage.encode(info, payload))
    }
}
