//! Response-side hooks the state machine drives.

use std::{error::Error, io, sync::Arc};

/// Status written when an unresolved timeout or error is turned into a
/// response.
pub const SERVER_ERROR_STATUS: u16 = 500;

/// Cause attached to an error reported through
/// [`AsyncRequestState::set_error`](super::AsyncRequestState::set_error).
pub type ErrorCause = Arc<dyn Error + Send + Sync>;

/// Response and connection resources owned by the embedding layer.
///
/// The state machine sets the status for unresolved errors, asks for an error
/// response to be rendered, and finally flushes the response and releases
/// transport resources when the exchange completes.
pub trait AsyncTransport: Send {
    /// Set the response status.
    fn set_status(&mut self, status: u16);

    /// Current response status.
    fn status(&self) -> u16;

    /// Render an error response for an unresolved timeout (`None`) or error.
    fn report_error(&mut self, _cause: Option<&ErrorCause>) {}

    /// Flush any buffered response bytes to the I/O layer.
    ///
    /// # Errors
    ///
    /// Returns an error when the response cannot be written; completion
    /// continues regardless.
    fn finish_response(&mut self) -> io::Result<()>;

    /// Release the request/response pair and any transport resources.
    fn end_request(&mut self);
}
