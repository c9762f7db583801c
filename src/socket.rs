//! Boundary to the raw duplex byte channel.
//!
//! The connection pool owns the real socket and hands the component that is
//! currently active a [`SocketFacade`]. Reads and writes never block: a
//! `WouldBlock` error means "try again after the next readiness event".

use std::io;

/// Readiness event a component can ask to be woken for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interest {
    /// The socket has bytes to read.
    Read,
    /// The socket can accept more bytes.
    Write,
}

/// Non-blocking view of a duplex byte channel.
pub trait SocketFacade: Send {
    /// Whether a read can make progress right now.
    fn is_readable_now(&self) -> bool;

    /// Whether a write can make progress right now.
    fn is_writable_now(&self) -> bool;

    /// Read available bytes into `buf`.
    ///
    /// `Ok(0)` signals end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::WouldBlock`] when no bytes are available and
    /// any other error for transport failures.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as many bytes of `buf` as the transport accepts.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::WouldBlock`] when nothing can be written and
    /// any other error for transport failures.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Ask the poller to issue a wakeup once `interest` becomes ready.
    fn request_wakeup_on(&mut self, interest: Interest);
}

impl<S: SocketFacade + ?Sized> SocketFacade for Box<S> {
    fn is_readable_now(&self) -> bool { (**self).is_readable_now() }

    fn is_writable_now(&self) -> bool { (**self).is_writable_now() }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { (**self).read(buf) }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { (**self).write(buf) }

    fn request_wakeup_on(&mut self, interest: Interest) { (**self).request_wakeup_on(interest) }
}

/// Returns true when `error` only means "not now".
pub(crate) fn would_block(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
