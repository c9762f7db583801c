use std::{ops::ControlFlow, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    ConnectionPhase,
    Endpoint,
    FrameSender,
    HandshakeContext,
    Session,
    SessionId,
    SessionRegistry,
    SocketState,
    UpgradeError,
    WriteNotifier,
};
use crate::{
    config::CoreConfig,
    frame::{CloseCode, CloseReason, FrameAssembler, FrameEncoder, FrameError, Message, ReadStatus, Role},
    metrics,
    panic::{CallbackError, CallbackFailure, guard_callback},
    reaper::Reapable,
    scope::{self, ApplicationScope, NoopScope},
    socket::SocketFacade,
};

struct Active {
    session: Session,
    endpoint: Arc<dyn Endpoint>,
    assembler: FrameAssembler,
    idle_timeout: Option<Duration>,
}

/// Why delivery stopped before the socket was drained.
enum Interrupt {
    PeerClosed(Option<CloseReason>),
    Endpoint(CallbackFailure),
}

fn invoke<F>(scope: &dyn ApplicationScope, callback: F) -> Result<(), CallbackFailure>
where
    F: FnOnce() -> Result<(), CallbackError>,
{
    let _guard = scope::enter(scope);
    guard_callback(callback)
}

/// Owner of one upgraded connection.
///
/// The connection layer calls [`pre_init`](Self::pre_init) with the
/// negotiated handshake, then [`init`](Self::init), then routes readiness
/// events to [`on_readable_event`](Self::on_readable_event) and
/// [`on_writable_event`](Self::on_writable_event) until one of them returns
/// [`SocketState::Closed`]. Only one thread may drive a coordinator at a
/// time; application threads interact through the [`Session`] handle.
pub struct UpgradeCoordinator<S> {
    socket: S,
    registry: Arc<SessionRegistry>,
    config: CoreConfig,
    role: Role,
    scope: Arc<dyn ApplicationScope>,
    notifier: Option<WriteNotifier>,
    pending: Option<(HandshakeContext, Arc<dyn Endpoint>)>,
    active: Option<Active>,
}

impl<S: SocketFacade> UpgradeCoordinator<S> {
    /// Create a server-side coordinator for `socket`.
    #[must_use]
    pub fn new(socket: S, registry: Arc<SessionRegistry>, config: CoreConfig) -> Self {
        Self {
            socket,
            registry,
            config,
            role: Role::Server,
            scope: Arc::new(NoopScope),
            notifier: None,
            pending: None,
            active: None,
        }
    }

    /// Run the connection as `role`.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Run endpoint callbacks inside `scope`.
    #[must_use]
    pub fn with_scope(mut self, scope: Arc<dyn ApplicationScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Notifier invoked when application code queues frames.
    #[must_use]
    pub fn with_write_notifier(mut self, notifier: WriteNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.active
            .as_ref()
            .map_or(ConnectionPhase::PreInit, |active| active.session.phase())
    }

    /// The session, once initialised.
    #[must_use]
    pub fn session(&self) -> Option<&Session> { self.active.as_ref().map(|active| &active.session) }

    /// The underlying socket.
    pub fn socket(&self) -> &S { &self.socket }

    /// Mutable access to the underlying socket.
    pub fn socket_mut(&mut self) -> &mut S { &mut self.socket }

    /// Supply the negotiated handshake and the endpoint to serve.
    ///
    /// # Errors
    ///
    /// Fails with [`UpgradeError::IllegalState`] once the connection is
    /// initialised.
    pub fn pre_init(
        &mut self,
        handshake: HandshakeContext,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), UpgradeError> {
        if self.active.is_some() {
            return Err(UpgradeError::IllegalState {
                operation: "pre-initialise",
                phase: self.phase(),
            });
        }
        self.pending = Some((handshake, endpoint));
        Ok(())
    }

    /// Open the connection and notify the endpoint.
    ///
    /// A failing `on_open` callback is reported through `on_error` and closes
    /// the connection with status 1011; `init` itself still succeeds.
    ///
    /// # Errors
    ///
    /// Fails with [`UpgradeError::NotInitialized`] when
    /// [`pre_init`](Self::pre_init) has not been called and with
    /// [`UpgradeError::IllegalState`] when called twice.
    pub fn init(&mut self) -> Result<(), UpgradeError> { self.init_at(Instant::now()) }

    /// [`init`](Self::init) with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`init`](Self::init).
    pub fn init_at(&mut self, now: Instant) -> Result<(), UpgradeError> {
        if self.active.is_some() {
            return Err(UpgradeError::IllegalState {
                operation: "initialise",
                phase: self.phase(),
            });
        }
        let Some((handshake, endpoint)) = self.pending.take() else {
            return Err(UpgradeError::NotInitialized);
        };

        let idle_timeout = handshake.idle_timeout().or(self.config.session_idle_timeout);
        let (metadata, transforms) = handshake.into_parts();
        let (inbound, outbound) = transforms.split();
        let assembler = FrameAssembler::new(
            self.role,
            inbound,
            self.config.max_message_size,
            self.config.initial_read_buffer,
        );
        let encoder = FrameEncoder::new(self.role, outbound, self.config.max_frame_payload);
        let sender = FrameSender::new(encoder, self.config.send_buffer_limit);
        let session = Session::new(SessionId::next(), metadata, sender, self.notifier.clone(), now);
        info!(
            session_id = %session.id(),
            uri = %session.metadata().request_uri,
            extensions = ?session.metadata().extensions,
            "connection upgraded"
        );
        metrics::inc_sessions();
        self.active = Some(Active {
            session: session.clone(),
            endpoint: Arc::clone(&endpoint),
            assembler,
            idle_timeout,
        });

        if let Err(failure) = invoke(&*self.scope, || endpoint.on_open(&session)) {
            self.fail_endpoint(failure);
            return Ok(());
        }
        self.registry.insert(&session);
        self.flush_outbound();
        Ok(())
    }

    /// Handle a readable socket.
    pub fn on_readable_event(&mut self) -> SocketState { self.on_readable_event_at(Instant::now()) }

    /// [`on_readable_event`](Self::on_readable_event) with an explicit clock
    /// reading.
    pub fn on_readable_event_at(&mut self, now: Instant) -> SocketState {
        let Some(active) = self.active.as_mut() else {
            debug!("readable event before initialisation ignored");
            return SocketState::Upgraded;
        };
        if active.session.phase() == ConnectionPhase::Closed {
            return SocketState::Closed;
        }

        let session = active.session.clone();
        let endpoint = Arc::clone(&active.endpoint);
        let scope = Arc::clone(&self.scope);
        let mut interrupt = None;
        let mut delivered = false;
        let result = active.assembler.on_readable(&mut self.socket, |message| {
            delivered = true;
            match message {
                Message::Ping(payload) => {
                    if let Err(error) = session.outbound().sender.enqueue(&Message::Pong(payload)) {
                        debug!(session_id = %session.id(), %error, "pong not queued");
                    }
                    ControlFlow::Continue(())
                }
                Message::Close(reason) => {
                    interrupt = Some(Interrupt::PeerClosed(reason));
                    ControlFlow::Break(())
                }
                message => match invoke(&*scope, || endpoint.on_message(&session, message)) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(failure) => {
                        interrupt = Some(Interrupt::Endpoint(failure));
                        ControlFlow::Break(())
                    }
                },
            }
        });
        if delivered {
            session.outbound().last_activity = now;
        }

        match (interrupt, result) {
            (Some(Interrupt::PeerClosed(reason)), _) => self.on_peer_close(reason),
            (Some(Interrupt::Endpoint(failure)), _) => self.fail_endpoint(failure),
            (None, Ok(ReadStatus::EndOfStream)) => self.fail_frame(FrameError::EndOfStream),
            (None, Ok(_)) => self.flush_outbound(),
            (None, Err(error)) => self.fail_frame(error),
        }
        self.socket_state()
    }

    /// Handle a writable socket by flushing queued frames.
    pub fn on_writable_event(&mut self) -> SocketState {
        match self.phase() {
            ConnectionPhase::PreInit => return SocketState::Upgraded,
            ConnectionPhase::Closed => return SocketState::Closed,
            ConnectionPhase::Open | ConnectionPhase::Closing => {}
        }
        self.flush_outbound();
        self.socket_state()
    }

    /// Close the connection.
    ///
    /// A close frame carrying `reason` is sent unless one was already sent.
    /// Send failures are logged and ignored. The session is then released
    /// and `on_close` fires with `reason`.
    ///
    /// # Errors
    ///
    /// Fails with [`UpgradeError::IllegalState`] unless the connection is
    /// open or closing.
    pub fn close(&mut self, reason: CloseReason) -> Result<(), UpgradeError> {
        match self.phase() {
            ConnectionPhase::Open | ConnectionPhase::Closing => {
                self.shutdown(reason, true);
                Ok(())
            }
            phase => Err(UpgradeError::IllegalState {
                operation: "close",
                phase,
            }),
        }
    }

    /// Close the connection because the server is stopping.
    pub fn stop(&mut self) -> SocketState {
        match self.phase() {
            ConnectionPhase::Open | ConnectionPhase::Closing => {
                self.shutdown(CloseReason::new(CloseCode::GoingAway, "server shutting down"), true);
            }
            ConnectionPhase::PreInit => self.pending = None,
            ConnectionPhase::Closed => {}
        }
        SocketState::Closed
    }

    /// Close the connection if it has been idle longer than its timeout.
    ///
    /// Returns whether the connection is still alive.
    pub fn check_idle(&mut self, now: Instant) -> bool {
        let Some(active) = self.active.as_ref() else {
            return true;
        };
        let (phase, last_activity) = {
            let outbound = active.session.outbound();
            (outbound.phase, outbound.last_activity)
        };
        if phase == ConnectionPhase::Closed {
            return false;
        }
        let Some(timeout) = active.idle_timeout else {
            return true;
        };
        if now.saturating_duration_since(last_activity) < timeout {
            return true;
        }
        info!(session_id = %active.session.id(), ?timeout, "closing idle session");
        self.shutdown(CloseReason::new(CloseCode::GoingAway, "session idle timeout"), true);
        false
    }

    fn socket_state(&self) -> SocketState {
        match self.phase() {
            ConnectionPhase::Closed => SocketState::Closed,
            _ => SocketState::Upgraded,
        }
    }

    fn flush_outbound(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let result = active.session.outbound().sender.flush(&mut self.socket);
        if let Err(error) = result {
            self.fail_frame(error);
        }
    }

    fn on_peer_close(&mut self, reason: Option<CloseReason>) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let session = active.session.clone();
        let local = {
            let mut outbound = session.outbound();
            if outbound.local_close.is_none() {
                if let Err(error) = outbound.sender.enqueue(&Message::Close(reason.clone())) {
                    warn!(session_id = %session.id(), %error, "failed to queue close reply");
                }
            }
            outbound.phase = ConnectionPhase::Closing;
            outbound.local_close.clone()
        };
        debug!(
            session_id = %session.id(),
            code = ?reason.as_ref().map(|r| r.code),
            initiated_locally = local.is_some(),
            "peer closed connection"
        );
        self.send_close_best_effort();
        let reason = reason.unwrap_or_else(|| CloseReason::new(CloseCode::NoStatus, ""));
        self.finish(&reason);
    }

    fn fail_endpoint(&mut self, failure: CallbackFailure) {
        warn!(error = %failure, "endpoint callback failed");
        metrics::inc_errors("endpoint");
        self.notify_error(&UpgradeError::Endpoint(failure));
        self.shutdown(CloseReason::new(CloseCode::UnexpectedCondition, "endpoint failure"), true);
    }

    fn fail_frame(&mut self, error: FrameError) {
        let reason = error.close_reason();
        let send_frame = !matches!(error, FrameError::Transport(_) | FrameError::EndOfStream);
        if send_frame {
            warn!(%error, code = %reason.code, "closing connection after frame error");
        } else {
            debug!(%error, "connection lost");
        }
        metrics::inc_errors(error.kind());
        self.notify_error(&UpgradeError::Frame(error));
        self.shutdown(reason, send_frame);
    }

    fn notify_error(&self, error: &UpgradeError) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let result = invoke(&*self.scope, || {
            active.endpoint.on_error(&active.session, error);
            Ok(())
        });
        if let Err(failure) = result {
            warn!(error = %failure, "endpoint error callback failed");
        }
    }

    fn shutdown(&mut self, reason: CloseReason, send_frame: bool) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        {
            let mut outbound = active.session.outbound();
            if outbound.phase == ConnectionPhase::Closed {
                return;
            }
            if send_frame && outbound.local_close.is_none() {
                if let Err(error) = outbound.sender.enqueue(&Message::Close(Some(reason.clone()))) {
                    warn!(session_id = %active.session.id(), %error, "failed to queue close frame");
                }
                outbound.local_close = Some(reason.clone());
            }
            outbound.phase = ConnectionPhase::Closing;
        }
        if send_frame {
            self.send_close_best_effort();
        }
        self.finish(&reason);
    }

    /// Flush without escalating failures; the connection is closing anyway.
    fn send_close_best_effort(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let result = active.session.outbound().sender.flush(&mut self.socket);
        if let Err(error) = result {
            warn!(session_id = %active.session.id(), %error, "failed to send close frame");
        }
    }

    fn finish(&mut self, reason: &CloseReason) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        {
            let mut outbound = active.session.outbound();
            if outbound.phase == ConnectionPhase::Closed {
                return;
            }
            outbound.phase = ConnectionPhase::Closed;
        }
        self.registry.remove(&active.session.id());
        metrics::dec_sessions();
        info!(session_id = %active.session.id(), code = %reason.code, "connection closed");
        let result = invoke(&*self.scope, || {
            active.endpoint.on_close(&active.session, reason);
            Ok(())
        });
        if let Err(failure) = result {
            warn!(error = %failure, "endpoint close callback failed");
        }
        // Wake the poller so a close triggered off its thread is observed.
        if let Some(notifier) = &self.notifier {
            notifier();
        }
    }
}

impl<S: SocketFacade> Reapable for UpgradeCoordinator<S> {
    fn reap(&mut self, now: Instant) -> bool { self.check_idle(now) }
}

impl<S> std::fmt::Debug for UpgradeCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeCoordinator")
            .field("role", &self.role)
            .field("pre_initialised", &self.pending.is_some())
            .field("session", &self.active.as_ref().map(|active| active.session.id()))
            .finish_non_exhaustive()
    }
}
