//! Test doubles for exercising `duplexwire` components without a real
//! connection pool.
//!
//! [`MockSocket`] stands in for the socket facade, the recording doubles
//! capture every callback an endpoint, listener or transport receives, and
//! the frame helpers encode and decode wire bytes from the peer's side.
//!
//! ```rust
//! use duplexwire::Message;
//! use duplexwire_testing::{MockSocket, client_wire};
//!
//! let mut socket = MockSocket::new();
//! socket.push_inbound(&client_wire(&Message::text("hi")));
//! assert!(socket.inbound_len() > 0);
//! ```

mod endpoint;
mod frames;
mod listener;
pub mod logging;
mod net;
mod socket;
mod transport;

pub use endpoint::{EndpointEvent, RecordingEndpoint};
pub use frames::{client_wire, decode_server, nz, unmasked_wire};
pub use listener::{ListenerAction, RecordingListener};
pub use logging::{LoggerHandle, logger};
pub use net::tcp_pair;
pub use socket::MockSocket;
pub use transport::{RecordingTransport, TransportLog};
