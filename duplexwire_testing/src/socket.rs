use std::{collections::VecDeque, io};

use duplexwire::{Interest, SocketFacade};

/// In-memory [`SocketFacade`].
///
/// Inbound bytes are queued with [`push_inbound`](Self::push_inbound) and
/// everything written by the component under test accumulates in an output
/// buffer. Writes can be throttled, blocked or made to fail.
#[derive(Debug, Default)]
pub struct MockSocket {
    inbound: VecDeque<u8>,
    eof: bool,
    outbound: Vec<u8>,
    blocked: bool,
    broken: bool,
    write_chunk: Option<usize>,
    wakeups: Vec<Interest>,
}

impl MockSocket {
    /// An open socket with nothing to read.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Queue bytes for the component to read.
    pub fn push_inbound(&mut self, bytes: &[u8]) { self.inbound.extend(bytes); }

    /// Bytes queued but not yet read.
    #[must_use]
    pub fn inbound_len(&self) -> usize { self.inbound.len() }

    /// Report end-of-stream once the queued bytes are read.
    pub fn close_inbound(&mut self) { self.eof = true; }

    /// Take every byte written so far.
    pub fn take_outbound(&mut self) -> Vec<u8> { std::mem::take(&mut self.outbound) }

    /// Whether nothing has been written since the last take.
    #[must_use]
    pub fn outbound_is_empty(&self) -> bool { self.outbound.is_empty() }

    /// Make writes fail with `WouldBlock` until unblocked.
    pub fn set_blocked(&mut self, blocked: bool) { self.blocked = blocked; }

    /// Make every write fail with a broken pipe.
    pub fn break_writes(&mut self) { self.broken = true; }

    /// Accept at most `chunk` bytes per write.
    pub fn limit_writes(&mut self, chunk: usize) { self.write_chunk = Some(chunk.max(1)); }

    /// Wakeups requested so far.
    #[must_use]
    pub fn wakeups(&self) -> &[Interest] { &self.wakeups }
}

impl SocketFacade for MockSocket {
    fn is_readable_now(&self) -> bool { !self.inbound.is_empty() || self.eof }

    fn is_writable_now(&self) -> bool { !self.blocked }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return if self.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if self.blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.write_chunk.map_or(buf.len(), |chunk| chunk.min(buf.len()));
        self.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn request_wakeup_on(&mut self, interest: Interest) { self.wakeups.push(interest); }
}
