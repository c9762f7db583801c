#![doc(html_root_url = "https://docs.rs/duplexwire/latest")]
//! Public API for the `duplexwire` library.
//!
//! This crate provides the connection lifecycle core of a server that
//! supports suspendable request/response exchanges and upgrades to a
//! framed, full-duplex message protocol: the asynchronous request state
//! machine, a non-blocking write gate, the frame assembler and the upgrade
//! coordinator, plus a timeout reaper and a tokio driver.

pub mod async_request;
pub mod byte_order;
pub mod config;
#[cfg(not(loom))]
pub mod driver;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod panic;
pub mod reaper;
pub mod scope;
pub mod socket;
pub mod upgrade;
pub mod write_gate;

pub use async_request::{
    AsyncEvent,
    AsyncListener,
    AsyncOutcome,
    AsyncPhase,
    AsyncRequestState,
    AsyncStateError,
    AsyncTransport,
    DispatchTable,
    RequestId,
};
pub use config::{ConfigError, CoreConfig};
/// Result type alias re-exported for convenience.
pub use error::{CoreError, Result};
pub use frame::{CloseCode, CloseReason, FrameAssembler, FrameEncoder, FrameError, Message, Role};
pub use metrics::{ASYNC_REQUESTS_TOTAL, Direction, ERRORS_TOTAL, FRAMES_TOTAL, SESSIONS_ACTIVE};
pub use reaper::{Reapable, TimeoutReaper};
pub use socket::{Interest, SocketFacade};
pub use upgrade::{
    ConnectionPhase,
    Endpoint,
    HandshakeContext,
    Session,
    SessionId,
    SessionRegistry,
    SocketState,
    UpgradeCoordinator,
    UpgradeError,
};
pub use write_gate::{NonBlockingWriteGate, WriteListener, WriteReadiness};
