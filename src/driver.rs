//! Tokio poller for upgraded connections.
//!
//! [`TokioSocket`] adapts a [`TcpStream`] to the non-blocking
//! [`SocketFacade`] using readiness hints refreshed by the event loop, and
//! [`UpgradedConnection`] routes readiness, application writes and shutdown
//! to an [`UpgradeCoordinator`].

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::warn;
use tokio::{
    io::{Interest as TokioInterest, Ready},
    net::TcpStream,
    sync::Notify,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::CoreConfig,
    frame::FrameError,
    socket::{Interest, SocketFacade},
    upgrade::{
        ConnectionPhase,
        Endpoint,
        HandshakeContext,
        SessionRegistry,
        SocketState,
        UpgradeCoordinator,
        UpgradeError,
    },
};

/// [`SocketFacade`] over a tokio [`TcpStream`].
#[derive(Debug)]
pub struct TokioSocket {
    stream: Arc<TcpStream>,
    readable: bool,
    writable: bool,
    write_wanted: bool,
}

impl TokioSocket {
    /// Wrap `stream`. The stream is assumed writable until a write blocks.
    #[must_use]
    pub fn new(stream: Arc<TcpStream>) -> Self {
        Self {
            stream,
            readable: false,
            writable: true,
            write_wanted: false,
        }
    }

    /// Record the readiness reported by the poller.
    pub fn set_ready(&mut self, ready: Ready) {
        self.readable |= ready.is_readable() || ready.is_read_closed();
        if ready.is_writable() || ready.is_write_closed() {
            self.writable = true;
            self.write_wanted = false;
        }
    }

    /// Readiness the poller should wait for next.
    #[must_use]
    pub fn interest(&self) -> TokioInterest {
        if self.write_wanted {
            TokioInterest::READABLE | TokioInterest::WRITABLE
        } else {
            TokioInterest::READABLE
        }
    }
}

impl SocketFacade for TokioSocket {
    fn is_readable_now(&self) -> bool { self.readable }

    fn is_writable_now(&self) -> bool { self.writable }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.stream.try_read(buf);
        if matches!(&result, Err(error) if error.kind() == io::ErrorKind::WouldBlock) {
            self.readable = false;
        }
        result
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.stream.try_write(buf);
        if matches!(&result, Err(error) if error.kind() == io::ErrorKind::WouldBlock) {
            self.writable = false;
        }
        result
    }

    fn request_wakeup_on(&mut self, interest: Interest) {
        match interest {
            Interest::Read => self.readable = false,
            Interest::Write => {
                self.writable = false;
                self.write_wanted = true;
            }
        }
    }
}

type SharedCoordinator = Arc<Mutex<UpgradeCoordinator<TokioSocket>>>;

/// An upgraded TCP connection driven by the tokio runtime.
pub struct UpgradedConnection {
    stream: Arc<TcpStream>,
    coordinator: SharedCoordinator,
    writes: Arc<Notify>,
}

impl UpgradedConnection {
    /// Prepare `stream` for framed-duplex mode serving `endpoint`.
    ///
    /// # Errors
    ///
    /// Propagates [`UpgradeCoordinator::pre_init`] failures.
    pub fn new(
        stream: TcpStream,
        registry: Arc<SessionRegistry>,
        config: CoreConfig,
        handshake: HandshakeContext,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<Self, UpgradeError> {
        let stream = Arc::new(stream);
        let writes = Arc::new(Notify::new());
        let notifier = {
            let writes = Arc::clone(&writes);
            Arc::new(move || writes.notify_one())
        };
        let mut coordinator = UpgradeCoordinator::new(TokioSocket::new(Arc::clone(&stream)), registry, config)
            .with_write_notifier(notifier);
        coordinator.pre_init(handshake, endpoint)?;
        Ok(Self {
            stream,
            coordinator: Arc::new(Mutex::new(coordinator)),
            writes,
        })
    }

    /// Shared coordinator, for registration with a
    /// [`TimeoutReaper`](crate::reaper::TimeoutReaper).
    #[must_use]
    pub fn coordinator(&self) -> &SharedCoordinator { &self.coordinator }

    fn lock(&self) -> MutexGuard<'_, UpgradeCoordinator<TokioSocket>> {
        self.coordinator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the connection and process events until it closes or
    /// `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError`] when initialisation fails or the poller
    /// reports an I/O error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), UpgradeError> {
        self.lock().init()?;
        loop {
            let interest = {
                let coordinator = self.lock();
                if coordinator.phase() == ConnectionPhase::Closed {
                    break;
                }
                coordinator.socket().interest()
            };
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    self.lock().stop();
                    break;
                }

                ready = self.stream.ready(interest) => {
                    let ready = match ready {
                        Ok(ready) => ready,
                        Err(error) => {
                            warn!("socket readiness failed: error={error}");
                            self.lock().stop();
                            return Err(UpgradeError::Frame(FrameError::Transport(error)));
                        }
                    };
                    if self.on_ready(ready) == SocketState::Closed {
                        break;
                    }
                }

                () = self.writes.notified() => {
                    if self.lock().on_writable_event() == SocketState::Closed {
                        break;
                    }
                }
            }
        }
        debug!("upgraded connection finished");
        Ok(())
    }

    fn on_ready(&self, ready: Ready) -> SocketState {
        let mut coordinator = self.lock();
        coordinator.socket_mut().set_ready(ready);
        let mut state = SocketState::Upgraded;
        if ready.is_readable() || ready.is_read_closed() {
            state = coordinator.on_readable_event();
        }
        if state == SocketState::Upgraded && ready.is_writable() {
            state = coordinator.on_writable_event();
        }
        state
    }
}

impl std::fmt::Debug for UpgradedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradedConnection")
            .field("peer", &self.stream.peer_addr().ok())
            .finish_non_exhaustive()
    }
}
