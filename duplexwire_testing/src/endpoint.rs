use std::sync::{Mutex, PoisonError};

use duplexwire::{CloseReason, Endpoint, Message, Session, UpgradeError, panic::CallbackError};

/// Callback observed by a [`RecordingEndpoint`].
#[derive(Clone, Debug, PartialEq)]
pub enum EndpointEvent {
    /// `on_open`.
    Open,
    /// `on_message` with the delivered message.
    Message(Message),
    /// `on_error` with the rendered error.
    Error(String),
    /// `on_close` with the reason.
    Close(CloseReason),
}

/// [`Endpoint`] that records every callback in order.
#[derive(Debug, Default)]
pub struct RecordingEndpoint {
    events: Mutex<Vec<EndpointEvent>>,
    echo: bool,
    fail_messages: bool,
}

impl RecordingEndpoint {
    /// Endpoint that only records.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Endpoint that also echoes text and binary messages back.
    #[must_use]
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Endpoint whose message handler always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_messages: true,
            ..Self::default()
        }
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<EndpointEvent> { self.events.lock().unwrap_or_else(PoisonError::into_inner).clone() }

    /// Messages delivered so far.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EndpointEvent::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: EndpointEvent) { self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event); }
}

impl Endpoint for RecordingEndpoint {
    fn on_open(&self, _session: &Session) -> Result<(), CallbackError> {
        self.push(EndpointEvent::Open);
        Ok(())
    }

    fn on_message(&self, session: &Session, message: Message) -> Result<(), CallbackError> {
        self.push(EndpointEvent::Message(message.clone()));
        if self.fail_messages {
            return Err("endpoint rejected message".into());
        }
        if self.echo {
            match message {
                Message::Text(text) => session.send_text(text)?,
                Message::Binary(data) => session.send_binary(data)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn on_error(&self, _session: &Session, error: &UpgradeError) { self.push(EndpointEvent::Error(error.to_string())); }

    fn on_close(&self, _session: &Session, reason: &CloseReason) { self.push(EndpointEvent::Close(reason.clone())); }
}
