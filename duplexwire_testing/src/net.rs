use tokio::net::{TcpListener, TcpStream};

/// Connected loopback pair: `(client, server)`.
///
/// # Panics
///
/// Panics if the loopback listener cannot be bound or connected.
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("listener address");
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.expect("connect"), accepted.expect("accept").0)
}
