//! Listener contract and the event handle passed to callbacks.

use std::{sync::Arc, time::Duration};

use super::{AsyncPhase, AsyncRequestState, AsyncStateError, ErrorCause, Exchange, RequestId};
use crate::panic::CallbackError;

/// Observer of an asynchronous request's lifecycle.
///
/// Every method defaults to doing nothing. Returned errors and panics are
/// logged and never stop the remaining listeners from being notified.
pub trait AsyncListener: Send + Sync {
    /// The exchange completed.
    fn on_complete(&self, _event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> { Ok(()) }

    /// The timeout elapsed. Calling [`AsyncEvent::complete`] or
    /// [`AsyncEvent::dispatch`] resolves it.
    fn on_timeout(&self, _event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> { Ok(()) }

    /// An error was reported. Calling [`AsyncEvent::complete`] or
    /// [`AsyncEvent::dispatch`] resolves it.
    fn on_error(&self, _event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> { Ok(()) }

    /// The request was suspended again. The listener is removed afterwards
    /// and may re-register through [`AsyncEvent::add_listener`].
    fn on_start_async(&self, _event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> { Ok(()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ListenerEvent {
    Complete,
    Timeout,
    Error,
    StartAsync,
}

impl ListenerEvent {
    pub(super) const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::StartAsync => "start_async",
        }
    }

    pub(super) fn notify(
        self,
        listener: &dyn AsyncListener,
        event: &mut AsyncEvent<'_>,
    ) -> Result<(), CallbackError> {
        match self {
            Self::Complete => listener.on_complete(event),
            Self::Timeout => listener.on_timeout(event),
            Self::Error => listener.on_error(event),
            Self::StartAsync => listener.on_start_async(event),
        }
    }
}

/// Handle given to listeners and dispatch handlers while they run.
///
/// Operations invoked through the handle are applied to the request under the
/// caller's existing exclusive access. `complete` requested from inside a
/// timeout or error notification, or from a dispatch handler, takes effect
/// once the notification round returns.
pub struct AsyncEvent<'a> {
    state: &'a mut AsyncRequestState,
}

impl<'a> AsyncEvent<'a> {
    pub(super) fn new(state: &'a mut AsyncRequestState) -> Self { Self { state } }

    /// Identifier of the request.
    #[must_use]
    pub fn request_id(&self) -> RequestId { self.state.id() }

    /// Current phase of the request.
    #[must_use]
    pub fn phase(&self) -> AsyncPhase { self.state.phase() }

    /// Cause attached to the most recent error, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&ErrorCause> { self.state.cause() }

    /// The suspended exchange.
    ///
    /// # Errors
    ///
    /// Fails while a dispatch is pending or after completion.
    pub fn exchange(&self) -> Result<&Exchange, AsyncStateError> { self.state.exchange() }

    /// Mutable access to the suspended exchange.
    ///
    /// # Errors
    ///
    /// Fails while a dispatch is pending or after completion.
    pub fn exchange_mut(&mut self) -> Result<&mut Exchange, AsyncStateError> {
        self.state.exchange_mut()
    }

    /// See [`AsyncRequestState::complete`].
    ///
    /// # Errors
    ///
    /// Fails once the request has ended.
    pub fn complete(&mut self) -> Result<(), AsyncStateError> { self.state.complete() }

    /// See [`AsyncRequestState::dispatch`].
    ///
    /// # Errors
    ///
    /// Propagates the dispatch failure.
    pub fn dispatch(&mut self, target: &str) -> Result<(), AsyncStateError> {
        self.state.dispatch(target)
    }

    /// See [`AsyncRequestState::start`].
    ///
    /// # Errors
    ///
    /// Fails unless called from a dispatch handler.
    pub fn start(
        &mut self,
        listeners: impl IntoIterator<Item = Arc<dyn AsyncListener>>,
    ) -> Result<(), AsyncStateError> {
        self.state.start(listeners)
    }

    /// See [`AsyncRequestState::start_task`].
    ///
    /// # Errors
    ///
    /// Fails without an executor or outside a suspended request.
    pub fn start_task<F>(&self, task: F) -> Result<(), AsyncStateError>
    where
        F: FnOnce() -> Result<(), CallbackError> + Send + 'static,
    {
        self.state.start_task(task)
    }

    /// See [`AsyncRequestState::add_listener`].
    ///
    /// # Errors
    ///
    /// Fails unless the request is suspended.
    pub fn add_listener(&mut self, listener: Arc<dyn AsyncListener>) -> Result<(), AsyncStateError> {
        self.state.add_listener(listener)
    }

    /// See [`AsyncRequestState::set_timeout`].
    ///
    /// # Errors
    ///
    /// Fails once the request has ended.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), AsyncStateError> {
        self.state.set_timeout(timeout)
    }
}
