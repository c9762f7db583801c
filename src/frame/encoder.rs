//! Outbound framing.

use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};

use super::{
    FragmentInfo,
    FrameError,
    FrameHeader,
    MAX_CONTROL_PAYLOAD,
    Message,
    OpCode,
    OutboundChain,
    Role,
    apply_mask,
    random_key,
};
use crate::metrics::{self, Direction};

/// Encodes messages into wire frames.
///
/// Data messages pass through the outbound transform chain and are split
/// into frames of at most `max_frame_payload` bytes. Frames sent by a client
/// are masked with a fresh random key.
pub struct FrameEncoder {
    role: Role,
    chain: OutboundChain,
    max_frame_payload: usize,
}

impl FrameEncoder {
    /// Create an encoder for frames sent by `role`.
    #[must_use]
    pub fn new(role: Role, chain: OutboundChain, max_frame_payload: NonZeroUsize) -> Self {
        Self {
            role,
            chain,
            max_frame_payload: max_frame_payload.get(),
        }
    }

    /// Encode `message` into one or more frames.
    ///
    /// # Errors
    ///
    /// Fails if a control payload exceeds 125 bytes or a transform fails.
    pub fn encode(&mut self, message: &Message) -> Result<Vec<Bytes>, FrameError> {
        match message {
            Message::Text(text) => self.encode_data(OpCode::Text, Bytes::copy_from_slice(text.as_bytes())),
            Message::Binary(bytes) => self.encode_data(OpCode::Binary, bytes.clone()),
            Message::Ping(bytes) => self.encode_control(OpCode::Ping, bytes),
            Message::Pong(bytes) => self.encode_control(OpCode::Pong, bytes),
            Message::Close(reason) => {
                let payload = reason.as_ref().map(|r| r.to_payload()).unwrap_or_default();
                self.encode_control(OpCode::Close, &payload)
            }
        }
    }

    fn encode_control(&self, opcode: OpCode, payload: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ProtocolViolation("control frame payload too long"));
        }
        Ok(vec![self.frame(true, 0, opcode, payload)])
    }

    fn encode_data(&mut self, opcode: OpCode, payload: Bytes) -> Result<Vec<Bytes>, FrameError> {
        let mut info = FragmentInfo {
            opcode,
            rsv: 0,
            fin: true,
        };
        let payload = self.chain.encode(&mut info, payload)?;
        if payload.is_empty() {
            return Ok(vec![self.frame(true, info.rsv, opcode, &[])]);
        }
        let count = payload.len().div_ceil(self.max_frame_payload);
        let frames = payload
            .chunks(self.max_frame_payload)
            .enumerate()
            .map(|(index, chunk)| {
                let first = index == 0;
                self.frame(
                    index + 1 == count,
                    if first { info.rsv } else { 0 },
                    if first { opcode } else { OpCode::Continuation },
                    chunk,
                )
            })
            .collect();
        Ok(frames)
    }

    fn frame(&self, fin: bool, rsv: u8, opcode: OpCode, payload: &[u8]) -> Bytes {
        let header = FrameHeader {
            fin,
            rsv,
            opcode,
            mask: (self.role == Role::Client).then(random_key),
            payload_len: u64::try_from(payload.len()).unwrap_or(u64::MAX),
        };
        let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.write(&mut buf);
        let start = buf.len();
        buf.extend_from_slice(payload);
        if let Some(key) = header.mask {
            apply_mask(&mut buf[start..], key);
        }
        metrics::inc_frames(Direction::Outbound);
        buf.freeze()
    }
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("role", &self.role)
            .field("max_frame_payload", &self.max_frame_payload)
            .finish_non_exhaustive()
    }
}
