use std::{
    collections::VecDeque,
    io,
    num::NonZeroUsize,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::time::Instant;

use super::*;
use crate::{
    config::CoreConfig,
    frame::{
        CloseCode,
        CloseReason,
        DeflateConfig,
        DeflateTransform,
        FrameAssembler,
        FrameEncoder,
        Message,
        PERMESSAGE_DEFLATE,
        Role,
        TransformChain,
    },
    panic::CallbackError,
    socket::{Interest, SocketFacade},
};

fn nz(value: usize) -> NonZeroUsize { NonZeroUsize::new(value).expect("non-zero") }

#[derive(Default)]
struct MemSocket {
    inbound: VecDeque<u8>,
    eof: bool,
    outbound: Vec<u8>,
    blocked: bool,
    fail_writes: bool,
    wakeups: Vec<Interest>,
}

impl SocketFacade for MemSocket {
    fn is_readable_now(&self) -> bool { !self.inbound.is_empty() || self.eof }

    fn is_writable_now(&self) -> bool { !self.blocked }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return if self.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if self.blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        // Accept at most seven bytes per call to exercise partial writes.
        let n = buf.len().min(7);
        self.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn request_wakeup_on(&mut self, interest: Interest) { self.wakeups.push(interest); }
}

#[derive(Clone, Debug, PartialEq)]
enum Event {
    Open,
    Message(Message),
    Error(String),
    Close(CloseReason),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    echo: bool,
    fail_open: bool,
    fail_messages: bool,
}

impl Recorder {
    fn events(&self) -> Vec<Event> { self.events.lock().expect("events").clone() }

    fn push(&self, event: Event) { self.events.lock().expect("events").push(event); }
}

impl Endpoint for Recorder {
    fn on_open(&self, _session: &Session) -> Result<(), CallbackError> {
        self.push(Event::Open);
        if self.fail_open {
            return Err("open refused".into());
        }
        Ok(())
    }

    fn on_message(&self, session: &Session, message: Message) -> Result<(), CallbackError> {
        self.push(Event::Message(message.clone()));
        if self.fail_messages {
            panic!("handler exploded");
        }
        if self.echo {
            if let Message::Text(text) = message {
                session.send_text(text)?;
            }
        }
        Ok(())
    }

    fn on_error(&self, _session: &Session, error: &UpgradeError) { self.push(Event::Error(error.to_string())); }

    fn on_close(&self, _session: &Session, reason: &CloseReason) { self.push(Event::Close(reason.clone())); }
}

struct Peer {
    encoder: FrameEncoder,
    decoder: FrameAssembler,
}

impl Peer {
    fn new(chain: TransformChain) -> Self {
        let (inbound, outbound) = chain.split();
        Self {
            encoder: FrameEncoder::new(Role::Client, outbound, nz(1024)),
            decoder: FrameAssembler::new(Role::Client, inbound, nz(1 << 16), nz(64)),
        }
    }

    fn plain() -> Self { Self::new(TransformChain::new()) }

    fn wire(&mut self, message: &Message) -> Vec<u8> {
        self.encoder
            .encode(message)
            .expect("encode")
            .iter()
            .flat_map(|frame| frame.iter().copied())
            .collect()
    }

    fn received(&mut self, bytes: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        self.decoder
            .feed(bytes, |message| {
                out.push(message);
                std::ops::ControlFlow::Continue(())
            })
            .expect("server frames decode");
        out
    }
}

struct Harness {
    coordinator: UpgradeCoordinator<MemSocket>,
    endpoint: Arc<Recorder>,
    registry: Arc<SessionRegistry>,
    peer: Peer,
}

impl Harness {
    fn send(&mut self, message: &Message) -> SocketState {
        let wire = self.peer.wire(message);
        self.coordinator.socket_mut().inbound.extend(wire);
        self.coordinator.on_readable_event()
    }

    fn sent(&mut self) -> Vec<Message> {
        let bytes = std::mem::take(&mut self.coordinator.socket_mut().outbound);
        self.peer.received(&bytes)
    }

    fn session(&self) -> Session { self.coordinator.session().expect("initialised").clone() }
}

fn small_config() -> CoreConfig {
    CoreConfig::builder()
        .max_message_size(nz(64))
        .initial_read_buffer(nz(16))
        .send_buffer_limit(nz(32))
        .build()
        .expect("valid config")
}

fn open_with(endpoint: Recorder, handshake: HandshakeContext, peer: Peer) -> Harness {
    let endpoint = Arc::new(endpoint);
    let registry = Arc::new(SessionRegistry::new());
    let mut coordinator = UpgradeCoordinator::new(MemSocket::default(), Arc::clone(&registry), small_config());
    coordinator
        .pre_init(handshake, Arc::clone(&endpoint) as Arc<dyn Endpoint>)
        .expect("pre-init");
    coordinator.init().expect("init");
    Harness {
        coordinator,
        endpoint,
        registry,
        peer,
    }
}

#[fixture]
fn echo() -> Harness {
    open_with(
        Recorder {
            echo: true,
            ..Recorder::default()
        },
        HandshakeContext::new("/chat"),
        Peer::plain(),
    )
}

fn is_close_with(event: &Event, code: CloseCode) -> bool { matches!(event, Event::Close(reason) if reason.code == code) }

#[rstest]
fn init_requires_pre_init() {
    let mut coordinator = UpgradeCoordinator::new(
        MemSocket::default(),
        Arc::new(SessionRegistry::new()),
        CoreConfig::default(),
    );
    assert!(matches!(coordinator.init(), Err(UpgradeError::NotInitialized)));
    assert_eq!(coordinator.phase(), ConnectionPhase::PreInit);
}

#[rstest]
fn init_twice_is_illegal(mut echo: Harness) {
    let err = echo.coordinator.init().expect_err("second init");
    assert!(matches!(
        err,
        UpgradeError::IllegalState {
            phase: ConnectionPhase::Open,
            ..
        }
    ));
    let err = echo
        .coordinator
        .pre_init(HandshakeContext::new("/again"), Arc::new(Recorder::default()))
        .expect_err("pre-init after open");
    assert!(matches!(err, UpgradeError::IllegalState { .. }));
}

#[rstest]
fn open_registers_session(echo: Harness) {
    assert_eq!(echo.coordinator.phase(), ConnectionPhase::Open);
    assert_eq!(echo.endpoint.events(), vec![Event::Open]);
    let session = echo.session();
    assert!(session.is_open());
    assert!(echo.registry.get(&session.id()).is_some());
    assert_eq!(echo.registry.active_ids(), vec![session.id()]);
}

#[rstest]
fn messages_round_trip_through_the_endpoint(mut echo: Harness) {
    assert_eq!(echo.send(&Message::text("hello")), SocketState::Upgraded);
    assert_eq!(echo.sent(), vec![Message::text("hello")]);
    assert_eq!(echo.endpoint.events()[1], Event::Message(Message::text("hello")));
}

#[rstest]
fn pings_are_answered_without_the_endpoint(mut echo: Harness) {
    echo.send(&Message::Ping(Bytes::from_static(b"are you there")));
    assert_eq!(echo.sent(), vec![Message::Pong(Bytes::from_static(b"are you there"))]);
    assert_eq!(echo.endpoint.events(), vec![Event::Open]);
}

#[rstest]
fn pongs_reach_the_endpoint(mut echo: Harness) {
    echo.send(&Message::Pong(Bytes::from_static(b"beat")));
    assert_eq!(
        echo.endpoint.events().last(),
        Some(&Event::Message(Message::Pong(Bytes::from_static(b"beat"))))
    );
}

#[rstest]
fn peer_close_is_echoed(mut echo: Harness) {
    let reason = CloseReason::new(CloseCode::Normal, "bye");
    assert_eq!(echo.send(&Message::Close(Some(reason.clone()))), SocketState::Closed);

    assert_eq!(echo.sent(), vec![Message::Close(Some(reason.clone()))]);
    assert_eq!(echo.coordinator.phase(), ConnectionPhase::Closed);
    assert_eq!(echo.endpoint.events(), vec![Event::Open, Event::Close(reason)]);
    assert!(echo.registry.get(&echo.session().id()).is_none());
    assert_eq!(echo.coordinator.on_readable_event(), SocketState::Closed);
}

#[rstest]
fn local_close_waits_for_peer_reply(mut echo: Harness) {
    let session = echo.session();
    session.close(CloseReason::new(CloseCode::GoingAway, "leaving")).expect("close");
    assert_eq!(session.phase(), ConnectionPhase::Closing);
    assert!(matches!(session.send_text("late"), Err(SendError::Closed)));

    assert_eq!(echo.coordinator.on_writable_event(), SocketState::Upgraded);
    assert_eq!(
        echo.sent(),
        vec![Message::Close(Some(CloseReason::new(CloseCode::GoingAway, "leaving")))]
    );

    let reply = CloseReason::new(CloseCode::GoingAway, "");
    assert_eq!(echo.send(&Message::Close(Some(reply.clone()))), SocketState::Closed);
    // Our close frame was already sent, so nothing is echoed.
    assert!(echo.sent().is_empty());
    let closes: Vec<_> = echo
        .endpoint
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::Close(_)))
        .collect();
    assert_eq!(closes, vec![Event::Close(reply)]);
}

#[rstest]
fn oversized_message_reports_error_then_closes_with_1009(mut echo: Harness) {
    echo.send(&Message::Binary(Bytes::from(vec![7_u8; 65])));

    let events = echo.endpoint.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[1], Event::Error(text) if text.contains("exceeds the limit")));
    assert!(is_close_with(&events[2], CloseCode::TooBig));
    assert!(matches!(
        echo.sent().as_slice(),
        [Message::Close(Some(reason))] if reason.code == CloseCode::TooBig
    ));
    assert_eq!(echo.coordinator.phase(), ConnectionPhase::Closed);
}

#[rstest]
fn unmasked_frame_closes_with_1002_without_delivery(mut echo: Harness) {
    // FIN + text, unmasked, "hi".
    echo.coordinator.socket_mut().inbound.extend([0x81, 0x02, b'h', b'i']);
    assert_eq!(echo.coordinator.on_readable_event(), SocketState::Closed);

    let events = echo.endpoint.events();
    assert!(!events.iter().any(|event| matches!(event, Event::Message(_))));
    assert!(matches!(&events[1], Event::Error(_)));
    assert!(is_close_with(&events[2], CloseCode::ProtocolError));
    assert!(matches!(
        echo.sent().as_slice(),
        [Message::Close(Some(reason))] if reason.code == CloseCode::ProtocolError
    ));
}

#[rstest]
fn end_of_stream_closes_abnormally_without_a_frame(mut echo: Harness) {
    echo.coordinator.socket_mut().eof = true;
    assert_eq!(echo.coordinator.on_readable_event(), SocketState::Closed);

    let events = echo.endpoint.events();
    assert!(matches!(&events[1], Event::Error(_)));
    assert!(is_close_with(&events[2], CloseCode::Abnormal));
    assert!(echo.coordinator.socket().outbound.is_empty());
}

#[rstest]
fn failing_handler_closes_with_1011() {
    let mut harness = open_with(
        Recorder {
            fail_messages: true,
            ..Recorder::default()
        },
        HandshakeContext::new("/boom"),
        Peer::plain(),
    );
    assert_eq!(harness.send(&Message::text("trigger")), SocketState::Closed);

    let events = harness.endpoint.events();
    assert!(matches!(&events[2], Event::Error(text) if text.contains("handler exploded")));
    assert!(is_close_with(&events[3], CloseCode::UnexpectedCondition));
}

#[rstest]
fn failing_open_closes_with_1011() {
    let harness = open_with(
        Recorder {
            fail_open: true,
            ..Recorder::default()
        },
        HandshakeContext::new("/refused"),
        Peer::plain(),
    );
    assert_eq!(harness.coordinator.phase(), ConnectionPhase::Closed);
    let events = harness.endpoint.events();
    assert!(matches!(&events[1], Event::Error(text) if text.contains("open refused")));
    assert!(is_close_with(&events[2], CloseCode::UnexpectedCondition));
    assert!(harness.registry.is_empty());
}

#[rstest]
fn stop_sends_going_away(mut echo: Harness) {
    assert_eq!(echo.coordinator.stop(), SocketState::Closed);
    assert!(matches!(
        echo.sent().as_slice(),
        [Message::Close(Some(reason))] if reason.code == CloseCode::GoingAway
    ));
    assert!(is_close_with(
        echo.endpoint.events().last().expect("close"),
        CloseCode::GoingAway
    ));
}

#[rstest]
fn close_swallows_send_failures(mut echo: Harness) {
    echo.coordinator.socket_mut().fail_writes = true;
    echo.coordinator
        .close(CloseReason::new(CloseCode::Normal, "done"))
        .expect("close");
    assert_eq!(echo.coordinator.phase(), ConnectionPhase::Closed);
    assert!(matches!(
        echo.coordinator.close(CloseReason::normal()),
        Err(UpgradeError::IllegalState {
            phase: ConnectionPhase::Closed,
            ..
        })
    ));
}

#[rstest]
fn blocked_socket_defers_writes_until_writable(mut echo: Harness) {
    echo.coordinator.socket_mut().blocked = true;
    let session = echo.session();
    session.send_text("queued").expect("send");
    assert_eq!(echo.coordinator.on_writable_event(), SocketState::Upgraded);
    assert!(echo.coordinator.socket().wakeups.contains(&Interest::Write));
    assert!(session.queued_bytes() > 0);

    echo.coordinator.socket_mut().blocked = false;
    echo.coordinator.on_writable_event();
    assert_eq!(session.queued_bytes(), 0);
    assert_eq!(echo.sent(), vec![Message::text("queued")]);
}

#[rstest]
fn send_buffer_limit_refuses_data(echo: Harness) {
    let session = echo.session();
    session.send_binary(vec![0_u8; 20]).expect("fits");
    assert!(matches!(
        session.send_binary(vec![0_u8; 20]),
        Err(SendError::BufferFull { limit: 32, .. })
    ));
    // Control frames are never refused for space.
    session.send_ping(Bytes::new()).expect("ping");
}

#[rstest]
fn refused_send_leaves_the_compressor_in_step() {
    let (_, outbound) = TransformChain::new()
        .with(DeflateTransform::new(Role::Server, DeflateConfig::default()))
        .split();
    let mut sender = FrameSender::new(FrameEncoder::new(Role::Server, outbound, nz(1024)), nz(64));
    let mut peer = Peer::new(TransformChain::new().with(DeflateTransform::new(Role::Client, DeflateConfig::default())));

    assert!(matches!(
        sender.enqueue(&Message::binary(vec![b'x'; 200])),
        Err(SendError::BufferFull { queued: 0, limit: 64 })
    ));
    let accepted = Message::binary(b"after the refusal ".repeat(2));
    sender.enqueue(&accepted).expect("fits");

    let mut socket = MemSocket::default();
    assert_eq!(sender.flush(&mut socket).expect("flush"), FlushStatus::Flushed);
    assert_eq!(peer.received(&socket.outbound), vec![accepted]);
}

#[rstest]
fn sends_notify_the_connection_layer() {
    let notified = Arc::new(AtomicUsize::new(0));
    let endpoint = Arc::new(Recorder::default());
    let mut coordinator = UpgradeCoordinator::new(
        MemSocket::default(),
        Arc::new(SessionRegistry::new()),
        CoreConfig::default(),
    )
    .with_write_notifier({
        let notified = Arc::clone(&notified);
        Arc::new(move || {
            notified.fetch_add(1, Ordering::SeqCst);
        })
    });
    coordinator
        .pre_init(HandshakeContext::new("/notify"), endpoint)
        .expect("pre-init");
    coordinator.init().expect("init");

    let session = coordinator.session().expect("session").clone();
    session.send_text("one").expect("send");
    session.send_binary(Bytes::from_static(b"two")).expect("send");
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}

#[rstest]
fn idle_sessions_are_closed_by_the_reaper() {
    let mut harness = open_with(
        Recorder::default(),
        HandshakeContext::new("/idle").with_idle_timeout(Duration::from_secs(5)),
        Peer::plain(),
    );
    let start = Instant::now();
    assert!(harness.coordinator.check_idle(start + Duration::from_secs(4)));
    assert!(!crate::reaper::Reapable::reap(
        &mut harness.coordinator,
        start + Duration::from_secs(6)
    ));
    assert!(matches!(
        harness.sent().as_slice(),
        [Message::Close(Some(reason))] if reason.code == CloseCode::GoingAway
    ));
}

#[rstest]
fn handshake_metadata_is_exposed() {
    let harness = open_with(
        Recorder::default(),
        HandshakeContext::new("/rooms/42")
            .with_query("lang=en")
            .with_path_param("room", "42")
            .with_subprotocol("chat.v2")
            .with_transform(DeflateTransform::new(Role::Server, DeflateConfig::default()))
            .secure(true)
            .with_http_session_id("JSESSION-1"),
        Peer::plain(),
    );
    let session = harness.session();
    let metadata = session.metadata();
    assert_eq!(metadata.request_uri, "/rooms/42");
    assert_eq!(metadata.query.as_deref(), Some("lang=en"));
    assert_eq!(metadata.path_params.get("room").map(String::as_str), Some("42"));
    assert_eq!(metadata.subprotocol.as_deref(), Some("chat.v2"));
    assert_eq!(metadata.extensions, vec![PERMESSAGE_DEFLATE.to_owned()]);
    assert!(metadata.secure);
    assert_eq!(metadata.http_session_id.as_deref(), Some("JSESSION-1"));
}

#[rstest]
fn negotiated_deflate_applies_both_ways() {
    let mut harness = open_with(
        Recorder {
            echo: true,
            ..Recorder::default()
        },
        HandshakeContext::new("/deflate")
            .with_transform(DeflateTransform::new(Role::Server, DeflateConfig::default())),
        Peer::new(TransformChain::new().with(DeflateTransform::new(Role::Client, DeflateConfig::default()))),
    );
    let text = "compressible ".repeat(4);
    harness.send(&Message::text(text.clone()));
    assert_eq!(harness.sent(), vec![Message::Text(text)]);
}

#[rstest]
fn registry_drops_closed_sessions() {
    let registry = SessionRegistry::new();
    let id = {
        let harness = open_with(Recorder::default(), HandshakeContext::new("/gone"), Peer::plain());
        let session = harness.session();
        registry.insert(&session);
        session.id()
    };
    assert_eq!(registry.len(), 1);
    assert!(registry.get(&id).is_none());
    assert!(registry.is_empty());
}
