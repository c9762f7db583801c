#![cfg(not(loom))]
//! Framed-duplex lifecycle through the public coordinator API.

use std::sync::Arc;

use bytes::Bytes;
use duplexwire::{
    CloseCode,
    CloseReason,
    ConnectionPhase,
    CoreConfig,
    Endpoint,
    HandshakeContext,
    Message,
    SessionRegistry,
    SocketState,
    UpgradeCoordinator,
};
use duplexwire_testing::{
    EndpointEvent,
    LoggerHandle,
    MockSocket,
    RecordingEndpoint,
    client_wire,
    decode_server,
    logger,
    nz,
    unmasked_wire,
};
use rstest::{fixture, rstest};

const MAX_MESSAGE: usize = 128;

struct Connection {
    coordinator: UpgradeCoordinator<MockSocket>,
    endpoint: Arc<RecordingEndpoint>,
    registry: Arc<SessionRegistry>,
}

impl Connection {
    fn open(endpoint: RecordingEndpoint) -> Self {
        let endpoint = Arc::new(endpoint);
        let registry = Arc::new(SessionRegistry::new());
        let config = CoreConfig::builder()
            .max_message_size(nz(MAX_MESSAGE))
            .initial_read_buffer(nz(32))
            .build()
            .expect("config");
        let mut coordinator = UpgradeCoordinator::new(MockSocket::new(), Arc::clone(&registry), config);
        coordinator
            .pre_init(
                HandshakeContext::new("/ws").with_subprotocol("echo"),
                Arc::clone(&endpoint) as Arc<dyn Endpoint>,
            )
            .expect("pre-init");
        coordinator.init().expect("init");
        Self {
            coordinator,
            endpoint,
            registry,
        }
    }

    fn receive(&mut self, wire: &[u8]) -> SocketState {
        self.coordinator.socket_mut().push_inbound(wire);
        self.coordinator.on_readable_event()
    }

    fn written(&mut self) -> Vec<Message> { decode_server(&self.coordinator.socket_mut().take_outbound()) }
}

#[fixture]
fn echo() -> Connection { Connection::open(RecordingEndpoint::echo()) }

#[rstest]
#[case::empty(0)]
#[case::one_byte(1)]
#[case::at_limit(MAX_MESSAGE)]
fn binary_messages_echo_at_boundary_sizes(mut echo: Connection, #[case] size: usize) {
    let payload = Bytes::from(vec![0x5a; size]);
    assert_eq!(
        echo.receive(&client_wire(&Message::Binary(payload.clone()))),
        SocketState::Upgraded
    );
    assert_eq!(echo.written(), vec![Message::Binary(payload)]);
}

#[rstest]
fn several_messages_in_one_read_are_all_delivered(mut echo: Connection) {
    let mut wire = client_wire(&Message::text("one"));
    wire.extend(client_wire(&Message::text("two")));
    wire.extend(client_wire(&Message::Ping(Bytes::from_static(b"p"))));
    echo.receive(&wire);

    assert_eq!(echo.endpoint.messages(), vec![Message::text("one"), Message::text("two")]);
    assert_eq!(
        echo.written(),
        vec![
            Message::text("one"),
            Message::text("two"),
            Message::Pong(Bytes::from_static(b"p")),
        ]
    );
}

#[rstest]
fn oversized_message_errors_before_closing_with_1009(mut echo: Connection) {
    let state = echo.receive(&client_wire(&Message::Binary(Bytes::from(vec![1; MAX_MESSAGE + 1]))));
    assert_eq!(state, SocketState::Closed);

    let events = echo.endpoint.events();
    let error_at = events
        .iter()
        .position(|event| matches!(event, EndpointEvent::Error(_)))
        .expect("error reported");
    let close_at = events
        .iter()
        .position(|event| matches!(event, EndpointEvent::Close(_)))
        .expect("close reported");
    assert!(error_at < close_at);
    assert!(matches!(&events[close_at], EndpointEvent::Close(reason) if reason.code == CloseCode::TooBig));
    assert!(echo.endpoint.messages().is_empty());
    assert_eq!(
        echo.written(),
        vec![Message::Close(Some(CloseReason::new(CloseCode::TooBig, "message too big")))]
    );
}

#[rstest]
fn unmasked_frame_closes_with_protocol_error(mut echo: Connection, mut logger: LoggerHandle) {
    let state = echo.receive(&unmasked_wire(&Message::text("sneaky")));
    assert_eq!(state, SocketState::Closed);
    assert!(echo.endpoint.messages().is_empty());
    assert!(matches!(
        echo.written().as_slice(),
        [Message::Close(Some(reason))] if reason.code == CloseCode::ProtocolError
    ));

    let warnings = logger.drain_at(log::Level::Warn);
    assert!(
        warnings.iter().any(|message| message.contains("closing connection after frame error")),
        "missing frame error warning in {warnings:?}"
    );
}

#[rstest]
fn peer_close_is_acknowledged_and_session_released(mut echo: Connection) {
    let session = echo.coordinator.session().expect("session").clone();
    assert_eq!(session.metadata().subprotocol.as_deref(), Some("echo"));
    assert!(echo.registry.get(&session.id()).is_some());

    let reason = CloseReason::new(CloseCode::Normal, "done");
    assert_eq!(echo.receive(&client_wire(&Message::Close(Some(reason.clone())))), SocketState::Closed);

    assert_eq!(echo.written(), vec![Message::Close(Some(reason.clone()))]);
    assert_eq!(echo.endpoint.events().last(), Some(&EndpointEvent::Close(reason)));
    assert_eq!(session.phase(), ConnectionPhase::Closed);
    assert!(echo.registry.get(&session.id()).is_none());
    assert!(session.send_text("too late").is_err());
}

#[rstest]
fn endpoint_failure_closes_with_1011() {
    let mut connection = Connection::open(RecordingEndpoint::failing());
    connection.receive(&client_wire(&Message::text("boom")));

    let events = connection.endpoint.events();
    assert!(matches!(&events[2], EndpointEvent::Error(text) if text.contains("endpoint rejected message")));
    assert!(matches!(&events[3], EndpointEvent::Close(reason) if reason.code == CloseCode::UnexpectedCondition));
}

#[rstest]
fn throttled_socket_still_flushes_everything(mut echo: Connection) {
    echo.coordinator.socket_mut().limit_writes(3);
    let text = "x".repeat(100);
    echo.receive(&client_wire(&Message::text(text.clone())));
    assert_eq!(echo.written(), vec![Message::Text(text)]);
}
