//! Seam for running application callbacks inside an ambient context.
//!
//! Embedding systems often need to install thread-local state (a context
//! loader, a tracing span, a security principal) while application code runs
//! and restore it afterwards. The core stays agnostic: it enters an
//! [`ApplicationScope`] around every listener and endpoint invocation and
//! relies on the returned [`ScopeGuard`] to restore the previous context, even
//! when the callback panics.

use std::any::Any;

/// Token returned by [`ApplicationScope::bind`] and handed back on unbind.
pub type PreviousContext = Option<Box<dyn Any>>;

/// Installs and restores the ambient context for application callbacks.
pub trait ApplicationScope: Send + Sync {
    /// Install the application context on the current thread.
    ///
    /// The returned value is passed back to [`unbind`](Self::unbind).
    fn bind(&self) -> PreviousContext { None }

    /// Restore the context captured by [`bind`](Self::bind).
    fn unbind(&self, _previous: PreviousContext) {}
}

/// Scope that installs nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScope;

impl ApplicationScope for NoopScope {}

/// RAII guard restoring the previous context on drop.
#[must_use = "the context is restored as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    scope: &'a dyn ApplicationScope,
    previous: Option<PreviousContext>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.scope.unbind(previous);
        }
    }
}

/// Enter `scope`, returning a guard that leaves it when dropped.
pub fn enter(scope: &dyn ApplicationScope) -> ScopeGuard<'_> {
    let previous = scope.bind();
    ScopeGuard {
        scope,
        previous: Some(previous),
    }
}
