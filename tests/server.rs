#![cfg(not(loom))]
//! Upgraded connections over loopback TCP, driven by the tokio poller.

use std::{sync::Arc, time::Duration};

use duplexwire::{
    CloseCode,
    CloseReason,
    CoreConfig,
    Endpoint,
    HandshakeContext,
    Message,
    SessionRegistry,
    TimeoutReaper,
    driver::UpgradedConnection,
};
use duplexwire_testing::{EndpointEvent, RecordingEndpoint, client_wire, decode_server, tcp_pair};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

async fn read_to_end(client: &mut TcpStream) -> Vec<Message> {
    let mut bytes = Vec::new();
    timeout(WAIT, client.read_to_end(&mut bytes))
        .await
        .expect("server closes the stream")
        .expect("read");
    decode_server(&bytes)
}

#[tokio::test]
async fn echo_session_is_registered_until_the_peer_closes() {
    let (mut client, server) = tcp_pair().await;
    let registry = Arc::new(SessionRegistry::new());
    let endpoint = Arc::new(RecordingEndpoint::echo());
    let connection = UpgradedConnection::new(
        server,
        Arc::clone(&registry),
        CoreConfig::default(),
        HandshakeContext::new("/echo"),
        Arc::clone(&endpoint) as Arc<dyn Endpoint>,
    )
    .expect("connection");
    let task = tokio::spawn(connection.run(CancellationToken::new()));

    client
        .write_all(&client_wire(&Message::text("hello")))
        .await
        .expect("write message");
    let mut reply = [0_u8; 7];
    timeout(WAIT, client.read_exact(&mut reply))
        .await
        .expect("echo arrives")
        .expect("read echo");
    assert_eq!(decode_server(&reply), vec![Message::text("hello")]);
    assert_eq!(registry.len(), 1);

    let goodbye = CloseReason::new(CloseCode::Normal, "bye");
    client
        .write_all(&client_wire(&Message::Close(Some(goodbye.clone()))))
        .await
        .expect("write close");
    assert_eq!(read_to_end(&mut client).await, vec![Message::Close(Some(goodbye.clone()))]);

    timeout(WAIT, task)
        .await
        .expect("run finishes")
        .expect("join")
        .expect("clean exit");
    assert!(registry.is_empty());
    assert_eq!(endpoint.events().last(), Some(&EndpointEvent::Close(goodbye)));
}

#[tokio::test]
async fn reaper_closes_idle_sessions() {
    let (mut client, server) = tcp_pair().await;
    let config = CoreConfig::builder()
        .reaper_interval(Duration::from_millis(10))
        .session_idle_timeout(Some(Duration::from_millis(50)))
        .build()
        .expect("config");
    let reaper = Arc::new(TimeoutReaper::new(config.reaper_interval));
    let shutdown = CancellationToken::new();
    let sweeper = Arc::clone(&reaper).spawn(shutdown.clone());

    let endpoint = Arc::new(RecordingEndpoint::new());
    let connection = UpgradedConnection::new(
        server,
        Arc::new(SessionRegistry::new()),
        config,
        HandshakeContext::new("/idle"),
        Arc::clone(&endpoint) as Arc<dyn Endpoint>,
    )
    .expect("connection");
    reaper.register(connection.coordinator());
    let task = tokio::spawn(connection.run(shutdown.clone()));

    let messages = read_to_end(&mut client).await;
    assert!(
        matches!(messages.as_slice(), [Message::Close(Some(reason))] if reason.code == CloseCode::GoingAway),
        "unexpected frames {messages:?}"
    );
    timeout(WAIT, task)
        .await
        .expect("run finishes")
        .expect("join")
        .expect("clean exit");
    assert!(matches!(
        endpoint.events().last(),
        Some(EndpointEvent::Close(reason)) if reason.code == CloseCode::GoingAway
    ));

    shutdown.cancel();
    sweeper.await.expect("reaper stops");
}
