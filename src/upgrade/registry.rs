//! Registry of live upgraded sessions.
//!
//! `SessionRegistry` stores non-owning weak references to sessions so other
//! tasks can look up and message live connections without keeping closed
//! ones alive. Dead entries are pruned opportunistically or lazily at lookup
//! time.
use std::sync::Weak;

use dashmap::DashMap;

use super::{Session, SessionId, session::SessionInner};

/// Concurrent registry of sessions keyed by [`SessionId`].
#[derive(Default)]
pub struct SessionRegistry(DashMap<SessionId, Weak<SessionInner>>);

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Retrieve the session for `id` if the connection is still alive.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let guard = self.0.get(id);
        let inner = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if inner.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        inner.map(Session::from_arc)
    }

    /// Insert a newly opened session.
    pub fn insert(&self, session: &Session) { self.0.insert(session.id(), session.downgrade()); }

    /// Remove a session, typically on connection teardown.
    pub fn remove(&self, id: &SessionId) { self.0.remove(id); }

    /// Number of entries, including ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Remove all stale weak references.
    ///
    /// `DashMap::retain` acquires per-bucket write locks, so other operations
    /// may contend briefly while the registry is pruned.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Prune stale references, then collect the remaining live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| {
            if let Some(inner) = weak.upgrade() {
                sessions.push(Session::from_arc(inner));
                true
            } else {
                false
            }
        });
        sessions
    }

    /// Prune stale references, then return the IDs of the live sessions.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SessionId> {
        let mut ids = Vec::with_capacity(self.0.len());
        self.0.retain(|id, weak| {
            if weak.strong_count() > 0 {
                ids.push(*id);
                true
            } else {
                false
            }
        });
        ids
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").field("len", &self.0.len()).finish()
    }
}
