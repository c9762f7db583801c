//! Application callbacks for an upgraded connection.

use super::{Session, UpgradeError};
use crate::{frame::{CloseReason, Message}, panic::CallbackError};

/// Session-scoped application endpoint.
///
/// Only the [`UpgradeCoordinator`](super::UpgradeCoordinator) invokes these
/// callbacks. `on_error` always precedes `on_close` when a failure closes
/// the connection, and `on_close` is invoked exactly once.
pub trait Endpoint: Send + Sync {
    /// The connection was upgraded.
    ///
    /// # Errors
    ///
    /// A failure is reported through `on_error` and closes the connection
    /// with status 1011.
    fn on_open(&self, _session: &Session) -> Result<(), CallbackError> { Ok(()) }

    /// A complete data message or a pong arrived.
    ///
    /// # Errors
    ///
    /// A failure is reported through `on_error` and closes the connection
    /// with status 1011.
    fn on_message(&self, session: &Session, message: Message) -> Result<(), CallbackError>;

    /// A failure occurred on the connection.
    fn on_error(&self, _session: &Session, _error: &UpgradeError) {}

    /// The connection closed.
    fn on_close(&self, _session: &Session, _reason: &CloseReason) {}
}
