use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use duplexwire::AsyncTransport;
use duplexwire::async_request::ErrorCause;

/// Everything a [`RecordingTransport`] was asked to do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportLog {
    /// Last status set.
    pub status: u16,
    /// Rendered error responses; `None` marks a timeout.
    pub error_reports: Vec<Option<String>>,
    /// Number of `finish_response` calls.
    pub finished: usize,
    /// Number of `end_request` calls.
    pub ended: usize,
}

/// [`AsyncTransport`] whose clones share one [`TransportLog`].
///
/// Box one clone into the state under test and inspect another.
#[derive(Clone, Debug)]
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl Default for RecordingTransport {
    fn default() -> Self { Self::new() }
}

impl RecordingTransport {
    /// Transport starting with status 200.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(TransportLog {
                status: 200,
                ..TransportLog::default()
            })),
        }
    }

    /// Snapshot of the log.
    #[must_use]
    pub fn log(&self) -> TransportLog { self.lock().clone() }

    /// Boxed clone ready to hand to a state machine.
    #[must_use]
    pub fn boxed(&self) -> Box<dyn AsyncTransport> { Box::new(self.clone()) }

    fn lock(&self) -> MutexGuard<'_, TransportLog> { self.log.lock().unwrap_or_else(PoisonError::into_inner) }
}

impl AsyncTransport for RecordingTransport {
    fn set_status(&mut self, status: u16) { self.lock().status = status; }

    fn status(&self) -> u16 { self.lock().status }

    fn report_error(&mut self, cause: Option<&ErrorCause>) {
        self.lock().error_reports.push(cause.map(ToString::to_string));
    }

    fn finish_response(&mut self) -> io::Result<()> {
        self.lock().finished += 1;
        Ok(())
    }

    fn end_request(&mut self) { self.lock().ended += 1; }
}
