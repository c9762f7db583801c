//! Frame header layout.
//!
//! ```text
//! FIN(1) RSV1-3(3) OPCODE(4) | MASK(1) LEN(7) [LEN16 | LEN64] [MASK KEY(32)]
//! ```

use bytes::{BufMut, BytesMut};

use super::FrameError;
use crate::byte_order::{read_network_u16, read_network_u64, write_network_u16, write_network_u64};

/// Largest encoded header: two fixed bytes, a 64-bit length and a mask key.
pub const MAX_HEADER_LEN: usize = 14;
/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;
/// RSV1, claimed by permessage-deflate.
pub const RSV1: u8 = 0b100;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// Frame type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continues a fragmented data message.
    Continuation,
    /// First frame of a UTF-8 text message.
    Text,
    /// First frame of a binary message.
    Binary,
    /// Connection close.
    Close,
    /// Keep-alive request.
    Ping,
    /// Keep-alive response.
    Pong,
}

impl OpCode {
    /// Whether frames of this type are control frames.
    #[must_use]
    pub fn is_control(self) -> bool { matches!(self, Self::Close | Self::Ping | Self::Pong) }

    /// Four-bit wire value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::ProtocolViolation("unknown opcode")),
        }
    }
}

/// Decoded frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Last frame of the message.
    pub fin: bool,
    /// Reserved bits, RSV1 in the most significant position.
    pub rsv: u8,
    /// Frame type.
    pub opcode: OpCode,
    /// Masking key, if the payload is masked.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the whole header, and
    /// otherwise the header together with its encoded length.
    ///
    /// # Errors
    ///
    /// Fails for unknown opcodes and for 64-bit lengths with the most
    /// significant bit set.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        let [first, second, rest @ ..] = buf else {
            return Ok(None);
        };
        let fin = first & FIN_BIT != 0;
        let rsv = (first >> 4) & 0b111;
        let opcode = OpCode::try_from(first & 0x0F)?;
        let masked = second & MASK_BIT != 0;
        let short_len = second & 0x7F;

        let extra = match short_len {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask_len = if masked { 4 } else { 0 };
        if rest.len() < extra + mask_len {
            return Ok(None);
        }

        let payload_len = match extra {
            2 => u64::from(read_network_u16([rest[0], rest[1]])),
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&rest[..8]);
                let len = read_network_u64(bytes);
                if len >> 63 != 0 {
                    return Err(FrameError::ProtocolViolation("payload length exceeds 63 bits"));
                }
                len
            }
            _ => u64::from(short_len),
        };
        let mask = masked.then(|| {
            let mut key = [0u8; 4];
            key.copy_from_slice(&rest[extra..extra + 4]);
            key
        });

        let header = Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
        };
        Ok(Some((header, 2 + extra + mask_len)))
    }

    /// Number of bytes [`write`](Self::write) produces.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let extra = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + extra + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Append the encoded header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        let mut first = self.opcode.as_u8() | ((self.rsv & 0b111) << 4);
        if self.fin {
            first |= FIN_BIT;
        }
        dst.put_u8(first);

        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        match u16::try_from(self.payload_len) {
            Ok(len @ 0..=125) => dst.put_u8(mask_bit | u8::try_from(len).unwrap_or(0)),
            Ok(len) => {
                dst.put_u8(mask_bit | 126);
                dst.put_slice(&write_network_u16(len));
            }
            Err(_) => {
                dst.put_u8(mask_bit | 127);
                dst.put_slice(&write_network_u64(self.payload_len));
            }
        }
        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }
}
