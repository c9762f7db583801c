//! Dispatch targets and the suspended exchange they operate on.

use std::{collections::HashMap, fmt, sync::Arc};

use super::{AsyncEvent, RequestId};
use crate::panic::CallbackError;

/// Request/response metadata carried across suspension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Exchange {
    /// URI of the request being processed.
    pub request_uri: String,
    /// Query string, if any.
    pub query: Option<String>,
    /// URI of the request before its first dispatch.
    pub original_request_uri: Option<String>,
}

impl Exchange {
    /// Create an exchange for `request_uri`.
    #[must_use]
    pub fn new(request_uri: impl Into<String>) -> Self {
        Self {
            request_uri: request_uri.into(),
            ..Self::default()
        }
    }
}

/// Application code a dispatch target resolves to.
pub trait DispatchHandler: Send + Sync {
    /// Process the dispatched request.
    ///
    /// The handler may call [`AsyncEvent::start`] to suspend again or
    /// [`AsyncEvent::complete`]. To hand the request on it must suspend
    /// first: [`AsyncEvent::dispatch`] fails with
    /// [`AsyncStateError::IllegalState`](super::AsyncStateError::IllegalState)
    /// while the request is still dispatching. When it does none of these
    /// the request completes once the handler returns.
    ///
    /// # Errors
    ///
    /// A returned error is reported through the request's error path.
    fn handle(&self, event: &mut AsyncEvent<'_>, target: &str) -> Result<(), CallbackError>;
}

impl<F> DispatchHandler for F
where
    F: Fn(&mut AsyncEvent<'_>, &str) -> Result<(), CallbackError> + Send + Sync,
{
    fn handle(&self, event: &mut AsyncEvent<'_>, target: &str) -> Result<(), CallbackError> {
        self(event, target)
    }
}

/// Routing layer seam resolving dispatch targets.
///
/// The core never interprets targets; it only invokes what the resolver
/// returns.
pub trait DispatchResolver: Send + Sync {
    /// Resolve `target`, or return `None` when the transport cannot dispatch
    /// to it.
    fn resolve(&self, target: &str) -> Option<Arc<dyn DispatchHandler>>;
}

/// Static table of dispatch targets.
#[derive(Clone, Default)]
pub struct DispatchTable {
    routes: HashMap<String, Arc<dyn DispatchHandler>>,
}

impl DispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` for `target`, replacing any previous handler.
    #[must_use]
    pub fn route(mut self, target: impl Into<String>, handler: impl DispatchHandler + 'static) -> Self {
        self.routes.insert(target.into(), Arc::new(handler));
        self
    }

    /// Register a closure for `target`.
    #[must_use]
    pub fn route_fn<F>(self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut AsyncEvent<'_>, &str) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.route(target, handler)
    }
}

impl DispatchResolver for DispatchTable {
    fn resolve(&self, target: &str) -> Option<Arc<dyn DispatchHandler>> {
        self.routes.get(target).cloned()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("targets", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Callback used to ask the connection layer to schedule
/// [`AsyncRequestState::run_dispatch`](super::AsyncRequestState::run_dispatch)
/// on a worker.
pub type DispatchNotifier = Arc<dyn Fn(RequestId) + Send + Sync>;

/// Dispatch recorded but not yet executed.
pub(super) struct PendingDispatch {
    pub(super) target: String,
    pub(super) handler: Arc<dyn DispatchHandler>,
    pub(super) exchange: Option<Exchange>,
}
