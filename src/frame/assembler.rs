//! Incremental decoding of readable bytes into messages.
//!
//! The assembler owns a flat read buffer with separate read and write
//! cursors. Bytes are read at the write cursor, complete frames are consumed
//! from the read cursor, and both cursors return to the start once the
//! buffer is drained. The buffer grows only up to the largest frame the
//! message limit allows, so a peer cannot make it grow without bound.
//!
//! Messages the inbound chain transforms are bounded twice: on the wire by
//! the chain's worst-case encoding of a message at the limit, and after
//! decoding by the limit itself.

use std::{num::NonZeroUsize, ops::ControlFlow};

use bytes::Bytes;
use tracing::trace;

use super::{
    CloseReason,
    FragmentInfo,
    FrameError,
    FrameHeader,
    InboundChain,
    MAX_CONTROL_PAYLOAD,
    MAX_HEADER_LEN,
    Message,
    OpCode,
    Role,
    apply_mask,
};
use crate::{
    metrics::{self, Direction},
    socket::{Interest, SocketFacade, would_block},
};

/// Why [`FrameAssembler::on_readable`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// No more bytes are available; a read wakeup was requested.
    Drained,
    /// The delivery callback asked to stop. Buffered bytes are kept.
    Stopped,
    /// The peer closed the stream.
    EndOfStream,
}

enum Progress {
    NeedMore,
    Stopped,
}

struct PartialMessage {
    opcode: OpCode,
    rsv: u8,
    wire_len: usize,
    data: Vec<u8>,
}

/// Turns readable bytes into complete [`Message`]s.
pub struct FrameAssembler {
    role: Role,
    chain: InboundChain,
    max_message_size: usize,
    max_buffer: usize,
    buffer: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    message: Option<PartialMessage>,
}

impl FrameAssembler {
    /// Create an assembler for frames received by `role`.
    #[must_use]
    pub fn new(
        role: Role,
        chain: InboundChain,
        max_message_size: NonZeroUsize,
        initial_buffer: NonZeroUsize,
    ) -> Self {
        let max_message_size = max_message_size.get();
        let max_frame = chain.max_encoded_len(chain.rsv_mask(), max_message_size);
        let max_buffer = max_frame.max(MAX_CONTROL_PAYLOAD).saturating_add(MAX_HEADER_LEN);
        Self {
            role,
            chain,
            max_message_size,
            max_buffer,
            buffer: vec![0; initial_buffer.get().min(max_buffer)],
            read_pos: 0,
            write_pos: 0,
            message: None,
        }
    }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize { self.write_pos - self.read_pos }

    /// Current size of the read buffer.
    #[must_use]
    pub fn capacity(&self) -> usize { self.buffer.len() }

    /// Whether a fragmented message is partially assembled.
    #[must_use]
    pub fn in_message(&self) -> bool { self.message.is_some() }

    /// Read everything `socket` has and deliver each completed message.
    ///
    /// Messages already buffered are delivered before reading. When `deliver`
    /// returns [`ControlFlow::Break`] the call returns
    /// [`ReadStatus::Stopped`] and the remaining bytes stay buffered for the
    /// next call.
    ///
    /// # Errors
    ///
    /// Returns the first protocol, size, payload, transform or transport
    /// failure. The connection should be closed afterwards.
    pub fn on_readable<S, F>(&mut self, socket: &mut S, mut deliver: F) -> Result<ReadStatus, FrameError>
    where
        S: SocketFacade + ?Sized,
        F: FnMut(Message) -> ControlFlow<()>,
    {
        loop {
            if let Progress::Stopped = self.process(&mut deliver)? {
                return Ok(ReadStatus::Stopped);
            }
            if !socket.is_readable_now() {
                socket.request_wakeup_on(Interest::Read);
                return Ok(ReadStatus::Drained);
            }
            self.make_room()?;
            match socket.read(&mut self.buffer[self.write_pos..]) {
                Ok(0) => return Ok(ReadStatus::EndOfStream),
                Ok(read) => {
                    trace!(read, buffered = self.buffered() + read, "read frame bytes");
                    self.write_pos += read;
                }
                Err(error) if would_block(&error) => {
                    socket.request_wakeup_on(Interest::Read);
                    return Ok(ReadStatus::Drained);
                }
                Err(error) => return Err(FrameError::Transport(error)),
            }
        }
    }

    /// Decode bytes the caller already holds.
    ///
    /// All of `bytes` is buffered, even when `deliver` stops early.
    ///
    /// # Errors
    ///
    /// See [`on_readable`](Self::on_readable).
    pub fn feed<F>(&mut self, bytes: &[u8], mut deliver: F) -> Result<ReadStatus, FrameError>
    where
        F: FnMut(Message) -> ControlFlow<()>,
    {
        self.compact();
        let end = self.write_pos + bytes.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.write_pos..end].copy_from_slice(bytes);
        self.write_pos = end;
        match self.process(&mut deliver)? {
            Progress::NeedMore => Ok(ReadStatus::Drained),
            Progress::Stopped => Ok(ReadStatus::Stopped),
        }
    }

    fn compact(&mut self) {
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        } else if self.read_pos > 0 {
            self.buffer.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.read_pos = 0;
        }
    }

    fn make_room(&mut self) -> Result<(), FrameError> {
        if self.write_pos < self.buffer.len() {
            return Ok(());
        }
        self.compact();
        if self.write_pos < self.buffer.len() {
            return Ok(());
        }
        if self.buffer.len() >= self.max_buffer {
            return Err(FrameError::MessageTooBig {
                size: self.buffered(),
                limit: self.max_message_size,
            });
        }
        let grown = self.buffer.len().saturating_mul(2).clamp(1, self.max_buffer);
        self.buffer.resize(grown, 0);
        Ok(())
    }

    fn process<F>(&mut self, deliver: &mut F) -> Result<Progress, FrameError>
    where
        F: FnMut(Message) -> ControlFlow<()>,
    {
        loop {
            let unread = &self.buffer[self.read_pos..self.write_pos];
            let Some((header, header_len)) = FrameHeader::parse(unread)? else {
                return Ok(Progress::NeedMore);
            };
            let payload_len = self.validate(&header)?;
            if unread.len() - header_len < payload_len {
                return Ok(Progress::NeedMore);
            }

            let start = self.read_pos + header_len;
            let end = start + payload_len;
            let payload = &mut self.buffer[start..end];
            if let Some(key) = header.mask {
                apply_mask(payload, key);
            }
            let payload = Bytes::copy_from_slice(payload);
            self.read_pos = end;
            if self.read_pos == self.write_pos {
                self.read_pos = 0;
                self.write_pos = 0;
            }
            metrics::inc_frames(Direction::Inbound);

            if let Some(message) = self.on_frame(&header, payload)? {
                if deliver(message).is_break() {
                    return Ok(Progress::Stopped);
                }
            }
        }
    }

    /// Check a header before its payload is buffered, returning the payload
    /// length.
    fn validate(&self, header: &FrameHeader) -> Result<usize, FrameError> {
        match (self.role, header.mask.is_some()) {
            (Role::Server, false) => return Err(FrameError::ProtocolViolation("unmasked client frame")),
            (Role::Client, true) => return Err(FrameError::ProtocolViolation("masked server frame")),
            _ => {}
        }

        if header.opcode.is_control() {
            if header.rsv != 0 {
                return Err(FrameError::ProtocolViolation("reserved bits set on control frame"));
            }
            if !header.fin {
                return Err(FrameError::ProtocolViolation("fragmented control frame"));
            }
            return usize::try_from(header.payload_len)
                .ok()
                .filter(|len| *len <= MAX_CONTROL_PAYLOAD)
                .ok_or(FrameError::ProtocolViolation("control frame payload too long"));
        }

        match (header.opcode, self.message.is_some()) {
            (OpCode::Continuation, false) => {
                return Err(FrameError::ProtocolViolation("continuation without a message in progress"));
            }
            (OpCode::Text | OpCode::Binary, true) => {
                return Err(FrameError::ProtocolViolation("new message before the previous one finished"));
            }
            _ => {}
        }
        let allowed = if header.opcode == OpCode::Continuation {
            0
        } else {
            self.chain.rsv_mask()
        };
        if header.rsv & !allowed != 0 {
            return Err(FrameError::ProtocolViolation("unexpected reserved bits"));
        }

        let (rsv, accumulated) = self
            .message
            .as_ref()
            .map_or((header.rsv, 0), |m| (m.rsv, m.wire_len));
        let size = usize::try_from(header.payload_len)
            .ok()
            .and_then(|len| accumulated.checked_add(len))
            .unwrap_or(usize::MAX);
        if size > self.wire_limit(rsv) {
            return Err(FrameError::MessageTooBig {
                size,
                limit: self.max_message_size,
            });
        }
        Ok(size - accumulated)
    }

    /// Largest wire size of a message whose first frame carries `rsv`.
    fn wire_limit(&self, rsv: u8) -> usize {
        if rsv & self.chain.rsv_mask() == 0 {
            self.max_message_size
        } else {
            self.chain.max_encoded_len(rsv, self.max_message_size)
        }
    }

    fn on_frame(&mut self, header: &FrameHeader, payload: Bytes) -> Result<Option<Message>, FrameError> {
        match header.opcode {
            OpCode::Ping => return Ok(Some(Message::Ping(payload))),
            OpCode::Pong => return Ok(Some(Message::Pong(payload))),
            OpCode::Close => return Ok(Some(Message::Close(CloseReason::from_payload(&payload)?))),
            OpCode::Text | OpCode::Binary => {
                self.message = Some(PartialMessage {
                    opcode: header.opcode,
                    rsv: header.rsv,
                    wire_len: 0,
                    data: Vec::new(),
                });
            }
            OpCode::Continuation => {}
        }
        let Some(partial) = self.message.as_mut() else {
            return Err(FrameError::ProtocolViolation("continuation without a message in progress"));
        };

        let info = FragmentInfo {
            opcode: partial.opcode,
            rsv: partial.rsv,
            fin: header.fin,
        };
        partial.wire_len += payload.len();
        let accumulated = partial.data.len();
        let limit = self.max_message_size;
        let decoded = self
            .chain
            .decode(&info, payload, limit - accumulated)
            .map_err(|error| match error {
                FrameError::MessageTooBig { size, .. } => FrameError::MessageTooBig {
                    size: accumulated.saturating_add(size),
                    limit,
                },
                other => other,
            })?;
        if accumulated + decoded.len() > limit {
            return Err(FrameError::MessageTooBig {
                size: accumulated + decoded.len(),
                limit,
            });
        }
        partial.data.extend_from_slice(&decoded);
        if !header.fin {
            return Ok(None);
        }

        let Some(PartialMessage { opcode, data, .. }) = self.message.take() else {
            return Ok(None);
        };
        let message = if opcode == OpCode::Text {
            String::from_utf8(data)
                .map(Message::Text)
                .map_err(|_| FrameError::InvalidPayload("text message is not valid UTF-8"))?
        } else {
            Message::Binary(Bytes::from(data))
        };
        Ok(Some(message))
    }
}

impl std::fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler")
            .field("role", &self.role)
            .field("max_message_size", &self.max_message_size)
            .field("capacity", &self.buffer.len())
            .field("buffered", &self.buffered())
            .field("in_message", &self.in_message())
            .finish_non_exhaustive()
    }
}
