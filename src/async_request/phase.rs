//! Lifecycle phases of an asynchronous request.

use std::fmt;

/// Phase of an [`AsyncRequestState`](super::AsyncRequestState).
///
/// `Idle` is initial and `Ended` is terminal. Once `Ended`, every operation
/// fails with [`AsyncStateError::IllegalState`](super::AsyncStateError).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AsyncPhase {
    /// The request has not been suspended.
    Idle,
    /// The request is suspended and waiting for a dispatch, completion or
    /// timeout.
    Started,
    /// A dispatch has been recorded or is running on a worker.
    Dispatching,
    /// Completion listeners are being notified.
    Completing,
    /// An error was reported and is being resolved.
    Errored,
    /// The timeout elapsed and is being resolved.
    TimedOut,
    /// The exchange is finished; the state is ready for recycling.
    Ended,
}

impl AsyncPhase {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Dispatching => "dispatching",
            Self::Completing => "completing",
            Self::Errored => "errored",
            Self::TimedOut => "timed_out",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for AsyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// How an asynchronous request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AsyncOutcome {
    /// Completed by the application or implicitly after a dispatch.
    Completed,
    /// The timeout elapsed and no listener resolved it.
    TimedOut,
    /// An error was reported and no listener resolved it.
    Failed,
}

impl AsyncOutcome {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }
}
