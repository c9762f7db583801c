//! Per-request asynchronous lifecycle.
//!
//! [`AsyncRequestState`] decides whether a suspended request may dispatch,
//! complete, time out or fail, and guarantees that every path ends with the
//! response finished and the transport released.
//!
//! The state is not internally locked. The connection layer must ensure that
//! at most one thread (the poller, a dispatched worker or the timeout reaper)
//! holds `&mut AsyncRequestState` at a time, typically by wrapping it in a
//! mutex and only re-arming poller interest once a worker has finished.
//!
//! Listener fan-outs iterate a snapshot of the listener list taken when the
//! event fires, so listeners registered during a fan-out are not visited by
//! it.

use std::{fmt, mem, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

mod dispatch;
mod error;
mod listener;
mod phase;
mod task;
mod transport;

pub use dispatch::{DispatchHandler, DispatchNotifier, DispatchResolver, DispatchTable, Exchange};
use dispatch::PendingDispatch;
pub use error::AsyncStateError;
pub use listener::{AsyncEvent, AsyncListener};
use listener::ListenerEvent;
pub use phase::{AsyncOutcome, AsyncPhase};
pub use task::{InlineExecutor, TaskExecutor, TaskJob};
pub use transport::{AsyncTransport, ErrorCause, SERVER_ERROR_STATUS};

use crate::{
    config::CoreConfig,
    metrics,
    panic::{CallbackError, guard_callback},
    reaper::Reapable,
    scope::{self, ApplicationScope, NoopScope},
};

/// Identifier assigned to an asynchronous request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl From<u64> for RequestId {
    fn from(value: u64) -> Self { Self(value) }
}

impl RequestId {
    /// Create a new [`RequestId`].
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "RequestId({})", self.0) }
}

/// State machine for a single suspended request.
pub struct AsyncRequestState {
    id: RequestId,
    phase: AsyncPhase,
    listeners: Vec<Arc<dyn AsyncListener>>,
    pending_dispatch: Option<PendingDispatch>,
    exchange: Option<Exchange>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cause: Option<ErrorCause>,
    outcome: Option<AsyncOutcome>,
    unresolved: Option<AsyncOutcome>,
    in_fan_out: bool,
    in_dispatch: bool,
    complete_requested: bool,
    transport: Box<dyn AsyncTransport>,
    resolver: Arc<dyn DispatchResolver>,
    scope: Arc<dyn ApplicationScope>,
    notifier: Option<DispatchNotifier>,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl AsyncRequestState {
    /// Create an idle state for request `id`.
    #[must_use]
    pub fn new(
        id: RequestId,
        transport: Box<dyn AsyncTransport>,
        resolver: Arc<dyn DispatchResolver>,
    ) -> Self {
        Self {
            id,
            phase: AsyncPhase::Idle,
            listeners: Vec::new(),
            pending_dispatch: None,
            exchange: Some(Exchange::default()),
            timeout: None,
            deadline: None,
            cause: None,
            outcome: None,
            unresolved: None,
            in_fan_out: false,
            in_dispatch: false,
            complete_requested: false,
            transport,
            resolver,
            scope: Arc::new(NoopScope),
            notifier: None,
            executor: None,
        }
    }

    /// Attach the exchange being suspended.
    #[must_use]
    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Run listeners and dispatch handlers inside `scope`.
    #[must_use]
    pub fn with_scope(mut self, scope: Arc<dyn ApplicationScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Arm `timeout` whenever the request suspends. `None` disables it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Apply the request settings from `config`. A zero
    /// [`CoreConfig::async_timeout`] leaves the timeout disarmed.
    #[must_use]
    pub fn with_config(self, config: &CoreConfig) -> Self { self.with_timeout(config.async_timeout()) }

    /// Run tasks started with [`start_task`](Self::start_task) on `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Call `notifier` whenever a dispatch is recorded so the connection
    /// layer can schedule [`run_dispatch`](Self::run_dispatch).
    #[must_use]
    pub fn with_dispatch_notifier(mut self, notifier: DispatchNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Identifier of the request.
    #[must_use]
    pub fn id(&self) -> RequestId { self.id }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> AsyncPhase { self.phase }

    /// How the request ended, once [`AsyncPhase::Ended`].
    #[must_use]
    pub fn outcome(&self) -> Option<AsyncOutcome> { self.outcome }

    /// Cause attached to the most recent error.
    #[must_use]
    pub fn cause(&self) -> Option<&ErrorCause> { self.cause.as_ref() }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    /// Instant at which the armed timeout elapses.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    /// Target of the dispatch waiting to run, if any.
    #[must_use]
    pub fn pending_target(&self) -> Option<&str> {
        self.pending_dispatch.as_ref().map(|p| p.target.as_str())
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize { self.listeners.len() }

    /// Response transport.
    #[must_use]
    pub fn transport(&self) -> &dyn AsyncTransport { self.transport.as_ref() }

    /// The suspended exchange.
    ///
    /// # Errors
    ///
    /// Fails while a dispatch is pending and after completion, so stale
    /// handles cannot be used concurrently with the dispatched worker.
    pub fn exchange(&self) -> Result<&Exchange, AsyncStateError> {
        let phase = self.phase;
        self.exchange.as_ref().ok_or(AsyncStateError::IllegalState {
            operation: "access the exchange",
            phase,
        })
    }

    /// Mutable access to the suspended exchange.
    ///
    /// # Errors
    ///
    /// See [`exchange`](Self::exchange).
    pub fn exchange_mut(&mut self) -> Result<&mut Exchange, AsyncStateError> {
        let phase = self.phase;
        self.exchange.as_mut().ok_or(AsyncStateError::IllegalState {
            operation: "access the exchange",
            phase,
        })
    }

    /// Suspend the request and register `listeners`.
    ///
    /// # Errors
    ///
    /// Fails with [`AsyncStateError::IllegalState`] unless the request is
    /// idle or is being re-suspended by a running dispatch handler.
    pub fn start(
        &mut self,
        listeners: impl IntoIterator<Item = Arc<dyn AsyncListener>>,
    ) -> Result<(), AsyncStateError> {
        self.start_at(listeners, Instant::now())
    }

    /// [`start`](Self::start) with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub fn start_at(
        &mut self,
        listeners: impl IntoIterator<Item = Arc<dyn AsyncListener>>,
        now: Instant,
    ) -> Result<(), AsyncStateError> {
        match self.phase {
            AsyncPhase::Idle => {}
            AsyncPhase::Dispatching if self.in_dispatch && self.pending_dispatch.is_none() => {
                self.fire(ListenerEvent::StartAsync);
                self.listeners.clear();
            }
            phase => {
                return Err(AsyncStateError::IllegalState {
                    operation: "start",
                    phase,
                });
            }
        }
        self.listeners.extend(listeners);
        self.phase = AsyncPhase::Started;
        self.deadline = self.timeout.map(|timeout| now + timeout);
        debug!(request_id = %self.id, listeners = self.listeners.len(), "request suspended");
        Ok(())
    }

    /// Register another listener on a suspended request.
    ///
    /// # Errors
    ///
    /// Fails unless the request is [`AsyncPhase::Started`].
    pub fn add_listener(&mut self, listener: Arc<dyn AsyncListener>) -> Result<(), AsyncStateError> {
        if self.phase != AsyncPhase::Started {
            return Err(AsyncStateError::IllegalState {
                operation: "add a listener",
                phase: self.phase,
            });
        }
        self.listeners.push(listener);
        Ok(())
    }

    /// Change the timeout, re-arming it if the request is suspended.
    ///
    /// # Errors
    ///
    /// Fails once the request has ended.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), AsyncStateError> {
        if self.phase == AsyncPhase::Ended {
            return Err(AsyncStateError::IllegalState {
                operation: "set the timeout",
                phase: self.phase,
            });
        }
        self.timeout = timeout;
        if self.phase == AsyncPhase::Started {
            self.deadline = timeout.map(|timeout| Instant::now() + timeout);
        }
        Ok(())
    }

    /// Hand the suspended request to `target`.
    ///
    /// The exchange moves into the pending dispatch and the dispatch notifier
    /// is invoked so a worker can call [`run_dispatch`](Self::run_dispatch).
    ///
    /// # Errors
    ///
    /// - [`AsyncStateError::DuplicateDispatch`] if a dispatch is pending.
    /// - [`AsyncStateError::UnsupportedDispatch`] if the resolver rejects
    ///   `target`.
    /// - [`AsyncStateError::IllegalState`] unless the request is suspended,
    ///   timing out or erroring.
    pub fn dispatch(&mut self, target: &str) -> Result<(), AsyncStateError> {
        if self.phase == AsyncPhase::Ended {
            return Err(AsyncStateError::IllegalState {
                operation: "dispatch",
                phase: self.phase,
            });
        }
        if self.pending_dispatch.is_some() {
            return Err(AsyncStateError::DuplicateDispatch);
        }
        if !matches!(
            self.phase,
            AsyncPhase::Started | AsyncPhase::TimedOut | AsyncPhase::Errored
        ) {
            return Err(AsyncStateError::IllegalState {
                operation: "dispatch",
                phase: self.phase,
            });
        }
        let handler = self
            .resolver
            .resolve(target)
            .ok_or_else(|| AsyncStateError::UnsupportedDispatch(target.to_owned()))?;

        let mut exchange = self.exchange.take();
        if let Some(exchange) = exchange.as_mut() {
            if exchange.original_request_uri.is_none() {
                exchange.original_request_uri = Some(exchange.request_uri.clone());
            }
        }
        self.pending_dispatch = Some(PendingDispatch {
            target: target.to_owned(),
            handler,
            exchange,
        });
        self.phase = AsyncPhase::Dispatching;
        self.deadline = None;
        debug!(request_id = %self.id, target, "dispatch recorded");
        if let Some(notifier) = &self.notifier {
            notifier(self.id);
        }
        Ok(())
    }

    /// Run `task` on the configured executor inside the application scope.
    ///
    /// The task does not touch the request; it typically captures a shared
    /// handle and completes or dispatches through it. A task that fails or
    /// panics is logged and leaves the request untouched.
    ///
    /// # Errors
    ///
    /// - [`AsyncStateError::IllegalState`] if the request was never
    ///   suspended, is completing or has ended.
    /// - [`AsyncStateError::NoExecutor`] when no executor is configured.
    pub fn start_task<F>(&self, task: F) -> Result<(), AsyncStateError>
    where
        F: FnOnce() -> Result<(), CallbackError> + Send + 'static,
    {
        if matches!(
            self.phase,
            AsyncPhase::Idle | AsyncPhase::Completing | AsyncPhase::Ended
        ) {
            return Err(AsyncStateError::IllegalState {
                operation: "start a task",
                phase: self.phase,
            });
        }
        let executor = self.executor.as_ref().ok_or(AsyncStateError::NoExecutor)?;
        let id = self.id;
        let scope = Arc::clone(&self.scope);
        debug!(request_id = %id, "task handed to executor");
        executor.execute(Box::new(move || {
            let result = {
                let _guard = scope::enter(scope.as_ref());
                guard_callback(task)
            };
            if let Err(failure) = result {
                log::warn!("async task failed: request_id={id}, error={failure}");
                metrics::inc_errors("task");
            }
        }));
        Ok(())
    }

    /// Execute the pending dispatch on the calling worker.
    ///
    /// Unless the handler suspends again or dispatches elsewhere, the request
    /// completes once the handler returns. A failing handler is reported
    /// through [`set_error`](Self::set_error).
    ///
    /// # Errors
    ///
    /// Fails with [`AsyncStateError::IllegalState`] when no dispatch is
    /// pending.
    pub fn run_dispatch(&mut self) -> Result<(), AsyncStateError> {
        if self.phase != AsyncPhase::Dispatching || self.pending_dispatch.is_none() {
            return Err(AsyncStateError::IllegalState {
                operation: "run a dispatch",
                phase: self.phase,
            });
        }
        let Some(PendingDispatch {
            target,
            handler,
            exchange,
        }) = self.pending_dispatch.take()
        else {
            return Ok(());
        };
        self.exchange = exchange;
        self.complete_requested = false;

        let was_dispatching = mem::replace(&mut self.in_dispatch, true);
        let scope = Arc::clone(&self.scope);
        let result = {
            let _guard = scope::enter(scope.as_ref());
            let mut event = AsyncEvent::new(self);
            guard_callback(|| handler.handle(&mut event, &target))
        };
        self.in_dispatch = was_dispatching;

        if let Err(failure) = result {
            warn!(request_id = %self.id, target = %target, error = %failure, "dispatch handler failed");
            metrics::inc_errors("dispatch");
            self.complete_requested = false;
            let cause: ErrorCause = Arc::from(failure.into_error());
            return self.set_error(Some(cause), true);
        }

        if mem::take(&mut self.complete_requested) {
            return self.complete();
        }
        if self.pending_dispatch.is_some() || self.phase == AsyncPhase::Started {
            return Ok(());
        }
        self.complete()
    }

    /// Finish the exchange.
    ///
    /// Fires `on_complete`, flushes the response and releases the transport.
    /// Called from inside a timeout or error notification, or from a
    /// dispatch handler, the completion is applied once that call returns.
    /// Calling it while already completing does nothing.
    ///
    /// # Errors
    ///
    /// Fails with [`AsyncStateError::IllegalState`] once ended.
    pub fn complete(&mut self) -> Result<(), AsyncStateError> {
        match self.phase {
            AsyncPhase::Ended => Err(AsyncStateError::IllegalState {
                operation: "complete",
                phase: self.phase,
            }),
            AsyncPhase::Completing => Ok(()),
            _ if self.in_fan_out || self.in_dispatch => {
                self.complete_requested = true;
                Ok(())
            }
            _ => {
                self.finish();
                Ok(())
            }
        }
    }

    /// Check the armed timeout, returning whether the request is still
    /// pending.
    ///
    /// # Errors
    ///
    /// Fails with [`AsyncStateError::IllegalState`] once ended.
    pub fn timeout_tick(&mut self) -> Result<bool, AsyncStateError> {
        self.timeout_tick_at(Instant::now())
    }

    /// [`timeout_tick`](Self::timeout_tick) with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`timeout_tick`](Self::timeout_tick).
    pub fn timeout_tick_at(&mut self, now: Instant) -> Result<bool, AsyncStateError> {
        if self.phase == AsyncPhase::Ended {
            return Err(AsyncStateError::IllegalState {
                operation: "check the timeout",
                phase: self.phase,
            });
        }
        let expired = self.phase == AsyncPhase::Started
            && self.deadline.is_some_and(|deadline| now >= deadline);
        if !expired {
            return Ok(true);
        }

        info!(request_id = %self.id, "asynchronous request timed out");
        self.phase = AsyncPhase::TimedOut;
        self.deadline = None;
        self.complete_requested = false;
        self.fire(ListenerEvent::Timeout);
        if self.resolved_by_listener() {
            return Ok(self.phase != AsyncPhase::Ended);
        }

        self.unresolved = Some(AsyncOutcome::TimedOut);
        self.transport.set_status(SERVER_ERROR_STATUS);
        self.transport.report_error(None);
        self.finish();
        Ok(false)
    }

    /// Record an error and resolve it.
    ///
    /// With `notify`, `on_error` is fired first. Unless a listener completes
    /// or dispatches the request, a server-error response is produced and the
    /// request completes.
    ///
    /// # Errors
    ///
    /// Fails with [`AsyncStateError::IllegalState`] if the request was never
    /// suspended, is completing or has ended.
    pub fn set_error(&mut self, cause: Option<ErrorCause>, notify: bool) -> Result<(), AsyncStateError> {
        if matches!(
            self.phase,
            AsyncPhase::Idle | AsyncPhase::Completing | AsyncPhase::Ended
        ) {
            return Err(AsyncStateError::IllegalState {
                operation: "report an error",
                phase: self.phase,
            });
        }
        if cause.is_some() {
            self.cause = cause;
        }
        if let Some(pending) = self.pending_dispatch.take() {
            debug!(request_id = %self.id, target = %pending.target, "pending dispatch abandoned");
            if self.exchange.is_none() {
                self.exchange = pending.exchange;
            }
        }
        self.phase = AsyncPhase::Errored;
        self.deadline = None;
        self.complete_requested = false;
        debug!(request_id = %self.id, notify, "asynchronous request errored");

        if notify {
            self.fire(ListenerEvent::Error);
        }
        if self.resolved_by_listener() {
            return Ok(());
        }

        self.unresolved = Some(AsyncOutcome::Failed);
        self.transport.set_status(SERVER_ERROR_STATUS);
        self.transport.report_error(self.cause.as_ref());
        // Only an erroring request is forced to complete.
        if self.phase == AsyncPhase::Errored {
            self.finish();
        }
        Ok(())
    }

    fn resolved_by_listener(&mut self) -> bool {
        if mem::take(&mut self.complete_requested) {
            self.finish();
            return true;
        }
        self.pending_dispatch.is_some()
    }

    fn finish(&mut self) {
        let outcome = self.unresolved.take().unwrap_or(AsyncOutcome::Completed);
        self.phase = AsyncPhase::Completing;
        self.deadline = None;
        self.fire(ListenerEvent::Complete);

        self.exchange = None;
        self.pending_dispatch = None;
        if let Err(error) = self.transport.finish_response() {
            debug!(request_id = %self.id, %error, "failed to flush response on completion");
        }
        self.transport.end_request();
        self.listeners.clear();

        self.phase = AsyncPhase::Ended;
        self.outcome = Some(outcome);
        metrics::inc_async_outcome(outcome.as_str());
        debug!(request_id = %self.id, outcome = outcome.as_str(), "asynchronous request ended");
    }

    fn fire(&mut self, kind: ListenerEvent) {
        let snapshot: Box<[Arc<dyn AsyncListener>]> = self.listeners.iter().cloned().collect();
        if snapshot.is_empty() {
            return;
        }
        let scope = Arc::clone(&self.scope);
        let _guard = scope::enter(scope.as_ref());
        let was_firing = mem::replace(&mut self.in_fan_out, true);
        for listener in &*snapshot {
            let result = {
                let mut event = AsyncEvent::new(self);
                guard_callback(|| kind.notify(listener.as_ref(), &mut event))
            };
            if let Err(failure) = result {
                warn!(
                    request_id = %self.id,
                    event = kind.as_str(),
                    error = %failure,
                    "async listener failed"
                );
                metrics::inc_errors("listener");
            }
        }
        self.in_fan_out = was_firing;
    }
}

impl Reapable for AsyncRequestState {
    fn reap(&mut self, now: Instant) -> bool { self.timeout_tick_at(now).unwrap_or(false) }
}

impl fmt::Debug for AsyncRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRequestState")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("listeners", &self.listeners.len())
            .field("pending_target", &self.pending_target())
            .field("deadline", &self.deadline)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
