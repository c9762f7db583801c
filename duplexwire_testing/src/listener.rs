use std::sync::{Mutex, PoisonError};

use duplexwire::{AsyncEvent, AsyncListener, panic::CallbackError};

/// What a [`RecordingListener`] does when notified of a timeout or error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ListenerAction {
    /// Leave the request unresolved.
    #[default]
    Nothing,
    /// Complete the request.
    Complete,
    /// Dispatch the request to the target.
    Dispatch(String),
}

/// [`AsyncListener`] recording the callbacks it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<&'static str>>,
    action: ListenerAction,
}

impl RecordingListener {
    /// Listener that only records.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Listener that resolves timeouts and errors with `action`.
    #[must_use]
    pub fn resolving(action: ListenerAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    /// Callback names in the order received.
    #[must_use]
    pub fn events(&self) -> Vec<&'static str> { self.events.lock().unwrap_or_else(PoisonError::into_inner).clone() }

    /// How often `name` was received.
    #[must_use]
    pub fn count(&self, name: &str) -> usize { self.events().iter().filter(|event| **event == name).count() }

    fn record(&self, name: &'static str) { self.events.lock().unwrap_or_else(PoisonError::into_inner).push(name); }

    fn resolve(&self, event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> {
        match &self.action {
            ListenerAction::Nothing => Ok(()),
            ListenerAction::Complete => event.complete().map_err(Into::into),
            ListenerAction::Dispatch(target) => event.dispatch(target).map_err(Into::into),
        }
    }
}

impl AsyncListener for RecordingListener {
    fn on_complete(&self, _event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> {
        self.record("complete");
        Ok(())
    }

    fn on_timeout(&self, event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> {
        self.record("timeout");
        self.resolve(event)
    }

    fn on_error(&self, event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> {
        self.record("error");
        self.resolve(event)
    }

    fn on_start_async(&self, _event: &mut AsyncEvent<'_>) -> Result<(), CallbackError> {
        self.record("start_async");
        Ok(())
    }
}
