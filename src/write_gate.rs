//! Non-blocking write readiness for a single response.
//!
//! Application code asks [`NonBlockingWriteGate::is_ready`] before writing.
//! When the transport cannot accept bytes the gate registers for a writable
//! wakeup and remembers that the consumer is waiting; the transport later
//! calls [`NonBlockingWriteGate::on_write_possible`], which fires the
//! consumer's callback exactly once for that not-ready to ready transition.
//!
//! The gate's mutex only guards the two flags. The consumer callback always
//! runs after the lock is released so it may call back into the gate.

use std::{io, mem, sync::Arc};
#[cfg(not(loom))]
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(loom)]
use loom::sync::{Mutex, MutexGuard};
#[cfg(loom)]
use std::sync::PoisonError;
use tracing::{debug, trace};

/// Transport side of the gate.
pub trait WriteReadiness: Send + Sync {
    /// Whether the transport can accept bytes right now.
    fn can_write_now(&self) -> bool;

    /// Ask the poller for a wakeup once the transport becomes writable.
    fn register_write_interest(&self);
}

/// Consumer notified when writing becomes possible.
pub trait WriteListener: Send + Sync {
    /// Writing is possible again.
    ///
    /// # Errors
    ///
    /// Errors are returned to the transport, which decides how to fail the
    /// response.
    fn on_write_possible(&self) -> io::Result<()>;
}

#[derive(Debug, Default)]
struct GateFlags {
    registered_for_write: bool,
    pending_notification: bool,
}

/// Per-response gate pairing write readiness with consumer notification.
pub struct NonBlockingWriteGate {
    flags: Mutex<GateFlags>,
    readiness: Arc<dyn WriteReadiness>,
    listener: Arc<dyn WriteListener>,
}

impl NonBlockingWriteGate {
    /// Create a gate over `readiness` notifying `listener`.
    #[must_use]
    pub fn new(readiness: Arc<dyn WriteReadiness>, listener: Arc<dyn WriteListener>) -> Self {
        Self {
            flags: Mutex::new(GateFlags::default()),
            readiness,
            listener,
        }
    }

    fn flags(&self) -> MutexGuard<'_, GateFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the listener on the response.
    ///
    /// Returns `true` when the transport is already writable. The gate is then
    /// armed as if a wakeup were pending and the caller must make the first
    /// [`on_write_possible`](Self::on_write_possible) call itself.
    pub fn enable(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let mut flags = self.flags();
        flags.registered_for_write = true;
        flags.pending_notification = true;
        true
    }

    /// Whether the consumer may write now.
    ///
    /// A `false` result guarantees a later callback through
    /// [`on_write_possible`](Self::on_write_possible).
    pub fn is_ready(&self) -> bool {
        let mut flags = self.flags();
        if flags.registered_for_write {
            flags.pending_notification = true;
            return false;
        }
        if self.readiness.can_write_now() {
            return true;
        }
        self.readiness.register_write_interest();
        flags.registered_for_write = true;
        flags.pending_notification = true;
        trace!("write gate registered for writable wakeup");
        false
    }

    /// Transport callback for a writable socket.
    ///
    /// Returns whether the consumer was notified.
    ///
    /// # Errors
    ///
    /// Propagates the consumer's callback error.
    pub fn on_write_possible(&self) -> io::Result<bool> {
        let fire = {
            let mut flags = self.flags();
            flags.registered_for_write = false;
            mem::take(&mut flags.pending_notification)
        };
        if !fire {
            return Ok(false);
        }
        if let Err(error) = self.listener.on_write_possible() {
            debug!(%error, "write listener failed");
            return Err(error);
        }
        Ok(true)
    }

    /// Reset the gate for reuse with another response.
    pub fn recycle(&self) {
        let mut flags = self.flags();
        *flags = GateFlags::default();
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use rstest::{fixture, rstest};

    use super::*;

    #[derive(Default)]
    struct FakeSocket {
        writable: AtomicBool,
        registrations: AtomicUsize,
    }

    impl WriteReadiness for FakeSocket {
        fn can_write_now(&self) -> bool { self.writable.load(Ordering::SeqCst) }

        fn register_write_interest(&self) { self.registrations.fetch_add(1, Ordering::SeqCst); }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl WriteListener for Counter {
        fn on_write_possible(&self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Setup {
        socket: Arc<FakeSocket>,
        listener: Arc<Counter>,
        gate: NonBlockingWriteGate,
    }

    #[fixture]
    fn setup() -> Setup {
        let socket = Arc::new(FakeSocket::default());
        let listener = Arc::new(Counter::default());
        let gate = NonBlockingWriteGate::new(
            Arc::clone(&socket) as Arc<dyn WriteReadiness>,
            Arc::clone(&listener) as Arc<dyn WriteListener>,
        );
        Setup {
            socket,
            listener,
            gate,
        }
    }

    #[rstest]
    fn writable_socket_is_ready_without_registration(setup: Setup) {
        setup.socket.writable.store(true, Ordering::SeqCst);
        assert!(setup.gate.is_ready());
        assert_eq!(setup.socket.registrations.load(Ordering::SeqCst), 0);
        assert!(!setup.gate.on_write_possible().expect("callback"));
    }

    #[rstest]
    fn not_ready_fires_exactly_once(setup: Setup) {
        assert!(!setup.gate.is_ready());
        assert!(!setup.gate.is_ready());
        assert_eq!(setup.socket.registrations.load(Ordering::SeqCst), 1);

        assert!(setup.gate.on_write_possible().expect("callback"));
        assert!(!setup.gate.on_write_possible().expect("callback"));
        assert_eq!(setup.listener.0.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn enable_on_writable_socket_arms_first_call(setup: Setup) {
        setup.socket.writable.store(true, Ordering::SeqCst);
        assert!(setup.gate.enable());
        assert!(!setup.gate.is_ready());
        assert!(setup.gate.on_write_possible().expect("callback"));
        assert_eq!(setup.listener.0.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn enable_on_blocked_socket_waits_for_wakeup(setup: Setup) {
        assert!(!setup.gate.enable());
        assert_eq!(setup.socket.registrations.load(Ordering::SeqCst), 1);
        assert!(setup.gate.on_write_possible().expect("callback"));
    }

    #[rstest]
    fn recycle_forgets_pending_notification(setup: Setup) {
        assert!(!setup.gate.is_ready());
        setup.gate.recycle();
        assert!(!setup.gate.on_write_possible().expect("callback"));
    }

    struct Reentrant {
        gate: std::sync::OnceLock<Arc<NonBlockingWriteGate>>,
        calls: AtomicUsize,
    }

    impl WriteListener for Reentrant {
        fn on_write_possible(&self) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = self.gate.get() {
                // Would deadlock if the flag lock were still held.
                let _ = gate.is_ready();
            }
            Ok(())
        }
    }

    #[rstest]
    fn callback_may_reenter_gate() {
        let socket = Arc::new(FakeSocket::default());
        let listener = Arc::new(Reentrant {
            gate: std::sync::OnceLock::new(),
            calls: AtomicUsize::new(0),
        });
        let gate = Arc::new(NonBlockingWriteGate::new(
            Arc::clone(&socket) as Arc<dyn WriteReadiness>,
            Arc::clone(&listener) as Arc<dyn WriteListener>,
        ));
        assert!(listener.gate.set(Arc::clone(&gate)).is_ok());

        assert!(!gate.is_ready());
        assert!(gate.on_write_possible().expect("callback"));
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        // The re-entrant check found the socket blocked and registered again.
        assert_eq!(socket.registrations.load(Ordering::SeqCst), 2);
        assert!(gate.on_write_possible().expect("callback"));
    }
}
