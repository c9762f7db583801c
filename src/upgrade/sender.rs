//! Outbound frame queue for an upgraded connection.

use std::{collections::VecDeque, num::NonZeroUsize};

use bytes::Bytes;
use tracing::trace;

use super::SendError;
use crate::{
    frame::{FrameEncoder, FrameError, Message},
    socket::{Interest, SocketFacade, would_block},
};

/// Result of a flush attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushStatus {
    /// Every queued byte was written.
    Flushed,
    /// The socket stopped accepting bytes; a write wakeup was requested.
    Pending,
}

/// Encodes outbound messages and writes them without blocking.
///
/// Frames are written strictly in order. A frame that was only partly
/// accepted by the socket stays at the head of the queue together with the
/// offset already written, so only one frame is ever in flight.
#[derive(Debug)]
pub struct FrameSender {
    encoder: FrameEncoder,
    queue: VecDeque<Bytes>,
    written: usize,
    queued_bytes: usize,
    limit: usize,
    closed: bool,
}

impl FrameSender {
    /// Create a sender refusing data once `limit` bytes are queued.
    #[must_use]
    pub fn new(encoder: FrameEncoder, limit: NonZeroUsize) -> Self {
        Self {
            encoder,
            queue: VecDeque::new(),
            written: 0,
            queued_bytes: 0,
            limit: limit.get(),
            closed: false,
        }
    }

    /// Bytes queued but not yet written.
    #[must_use]
    pub fn queued_bytes(&self) -> usize { self.queued_bytes }

    /// Whether nothing is waiting to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    /// Whether a close frame has been queued.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed }

    /// Encode `message` and append its frames to the queue.
    ///
    /// The limit is checked against the payload size before any transform
    /// runs, so a refused message leaves stateful encoders untouched. Control
    /// messages are accepted past the buffer limit so a pong or close can
    /// always be queued. Queuing a close message closes the sender.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] after a close was queued,
    /// [`SendError::BufferFull`] when a data message would exceed the limit
    /// and [`SendError::Frame`] when encoding fails.
    pub fn enqueue(&mut self, message: &Message) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        if !message.is_control() && self.queued_bytes.saturating_add(message.len()) > self.limit {
            return Err(SendError::BufferFull {
                queued: self.queued_bytes,
                limit: self.limit,
            });
        }
        let frames = self.encoder.encode(message)?;
        self.queued_bytes += frames.iter().map(Bytes::len).sum::<usize>();
        self.queue.extend(frames);
        if matches!(message, Message::Close(_)) {
            self.closed = true;
        }
        Ok(())
    }

    /// Write queued frames until the queue is empty or the socket blocks.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Transport`] when the socket fails.
    pub fn flush<S: SocketFacade + ?Sized>(&mut self, socket: &mut S) -> Result<FlushStatus, FrameError> {
        while let Some(frame) = self.queue.front() {
            if !socket.is_writable_now() {
                socket.request_wakeup_on(Interest::Write);
                return Ok(FlushStatus::Pending);
            }
            match socket.write(&frame[self.written..]) {
                Ok(0) => {
                    socket.request_wakeup_on(Interest::Write);
                    return Ok(FlushStatus::Pending);
                }
                Ok(n) => {
                    self.written += n;
                    self.queued_bytes -= n;
                    if self.written == frame.len() {
                        self.queue.pop_front();
                        self.written = 0;
                    }
                    trace!(written = n, queued = self.queued_bytes, "wrote frame bytes");
                }
                Err(error) if would_block(&error) => {
                    socket.request_wakeup_on(Interest::Write);
                    return Ok(FlushStatus::Pending);
                }
                Err(error) => return Err(FrameError::Transport(error)),
            }
        }
        Ok(FlushStatus::Flushed)
    }

    /// Transport callback for a writable socket.
    ///
    /// # Errors
    ///
    /// See [`flush`](Self::flush).
    pub fn on_writable<S: SocketFacade + ?Sized>(&mut self, socket: &mut S) -> Result<FlushStatus, FrameError> {
        self.flush(socket)
    }
}
