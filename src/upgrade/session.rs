//! Application-facing handle to an upgraded connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use super::{ConnectionPhase, FrameSender, SendError, SessionMetadata};
use crate::frame::{CloseReason, Message};

/// Callback asking the connection layer to flush queued frames.
pub type WriteNotifier = Arc<dyn Fn() + Send + Sync>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier assigned to an upgraded connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl From<u64> for SessionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl SessionId {
    /// Create a new [`SessionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Allocate a process-unique identifier.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

pub(super) struct Outbound {
    pub(super) phase: ConnectionPhase,
    pub(super) sender: FrameSender,
    /// Reason carried by the close frame we sent, if any.
    pub(super) local_close: Option<CloseReason>,
    pub(super) last_activity: Instant,
}

pub(super) struct SessionInner {
    id: SessionId,
    metadata: SessionMetadata,
    outbound: Mutex<Outbound>,
    notifier: Option<WriteNotifier>,
}

/// Cloneable handle used by application code to talk to the peer.
///
/// Sends only queue frames; the connection flushes them on its next event.
/// When a notifier was supplied by the connection layer every send also
/// asks it to schedule a flush, so sends from other threads make progress.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(super) fn new(
        id: SessionId,
        metadata: SessionMetadata,
        sender: FrameSender,
        notifier: Option<WriteNotifier>,
        now: Instant,
    ) -> Self {
        let outbound = Outbound {
            phase: ConnectionPhase::Open,
            sender,
            local_close: None,
            last_activity: now,
        };
        Self {
            inner: Arc::new(SessionInner {
                id,
                metadata,
                outbound: Mutex::new(outbound),
                notifier,
            }),
        }
    }

    pub(super) fn from_arc(inner: Arc<SessionInner>) -> Self { Self { inner } }

    pub(super) fn downgrade(&self) -> Weak<SessionInner> { Arc::downgrade(&self.inner) }

    pub(super) fn outbound(&self) -> MutexGuard<'_, Outbound> {
        self.inner.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of this session.
    #[must_use]
    pub fn id(&self) -> SessionId { self.inner.id }

    /// Handshake metadata.
    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata { &self.inner.metadata }

    /// Current connection phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase { self.outbound().phase }

    /// Whether application messages may still be sent.
    #[must_use]
    pub fn is_open(&self) -> bool { self.phase() == ConnectionPhase::Open }

    /// Bytes queued but not yet written to the socket.
    #[must_use]
    pub fn queued_bytes(&self) -> usize { self.outbound().sender.queued_bytes() }

    /// Queue a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(&Message::Text(text.into()))
    }

    /// Queue a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(&Message::Binary(data.into()))
    }

    /// Queue a ping.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(&Message::Ping(payload.into()))
    }

    /// Queue `message` for the peer.
    ///
    /// A close message is treated as [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] unless the session is open,
    /// [`SendError::BufferFull`] when the send buffer limit is reached and
    /// [`SendError::Frame`] when the message cannot be encoded.
    pub fn send(&self, message: &Message) -> Result<(), SendError> {
        if let Message::Close(reason) = message {
            return self.close(reason.clone().unwrap_or_else(CloseReason::normal));
        }
        {
            let mut outbound = self.outbound();
            if outbound.phase != ConnectionPhase::Open {
                return Err(SendError::Closed);
            }
            outbound.sender.enqueue(message)?;
            outbound.last_activity = Instant::now();
        }
        self.notify();
        Ok(())
    }

    /// Start the closing handshake.
    ///
    /// The session stays in [`ConnectionPhase::Closing`] until the peer
    /// answers with its own close frame. Closing a session that is already
    /// closing does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is already closed and
    /// [`SendError::Frame`] when the close frame cannot be encoded.
    pub fn close(&self, reason: CloseReason) -> Result<(), SendError> {
        {
            let mut outbound = self.outbound();
            match outbound.phase {
                ConnectionPhase::Open => {}
                ConnectionPhase::Closing => return Ok(()),
                ConnectionPhase::PreInit | ConnectionPhase::Closed => return Err(SendError::Closed),
            }
            outbound.sender.enqueue(&Message::Close(Some(reason.clone())))?;
            debug!(session_id = %self.id(), code = %reason.code, "session close requested");
            outbound.local_close = Some(reason);
            outbound.phase = ConnectionPhase::Closing;
        }
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        if let Some(notifier) = &self.inner.notifier {
            notifier();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("request_uri", &self.inner.metadata.request_uri)
            .finish_non_exhaustive()
    }
}
