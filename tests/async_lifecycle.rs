#![cfg(not(loom))]
//! End-to-end lifecycle of suspended requests driven by the timeout reaper.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use duplexwire::{
    AsyncListener,
    AsyncOutcome,
    AsyncPhase,
    AsyncRequestState,
    DispatchTable,
    RequestId,
    TimeoutReaper,
    async_request::{InlineExecutor, SERVER_ERROR_STATUS},
    config::CoreConfig,
};
use duplexwire_testing::{ListenerAction, LoggerHandle, RecordingListener, RecordingTransport, logger};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

fn suspended(
    id: u64,
    transport: &RecordingTransport,
    table: DispatchTable,
    listener: &Arc<RecordingListener>,
) -> Arc<Mutex<AsyncRequestState>> {
    let config = CoreConfig::builder()
        .async_timeout(Duration::from_millis(5000))
        .build()
        .expect("config");
    let mut state =
        AsyncRequestState::new(RequestId::new(id), transport.boxed(), Arc::new(table)).with_config(&config);
    state
        .start([Arc::clone(listener) as Arc<dyn AsyncListener>])
        .expect("start");
    Arc::new(Mutex::new(state))
}

async fn run_reaper_for(reaper: &Arc<TimeoutReaper>, wait: Duration) {
    let shutdown = CancellationToken::new();
    let task = Arc::clone(reaper).spawn(shutdown.clone());
    tokio::time::sleep(wait).await;
    shutdown.cancel();
    task.await.expect("reaper task");
}

#[tokio::test(start_paused = true)]
async fn unresolved_timeout_becomes_server_error() {
    let transport = RecordingTransport::new();
    let listener = Arc::new(RecordingListener::new());
    let state = suspended(1, &transport, DispatchTable::new(), &listener);
    let reaper = Arc::new(TimeoutReaper::new(Duration::from_millis(100)));
    reaper.register(&state);

    run_reaper_for(&reaper, Duration::from_millis(5100)).await;

    assert_eq!(listener.count("timeout"), 1);
    assert_eq!(transport.log().status, SERVER_ERROR_STATUS);
    assert_eq!(transport.log().error_reports, vec![None]);
    assert_eq!(transport.log().ended, 1);
    let state = state.lock().expect("state");
    assert_eq!(state.phase(), AsyncPhase::Ended);
    assert_eq!(state.outcome(), Some(AsyncOutcome::TimedOut));
    assert!(reaper.is_empty());
}

#[tokio::test(start_paused = true)]
async fn request_is_untouched_before_its_deadline() {
    let transport = RecordingTransport::new();
    let listener = Arc::new(RecordingListener::new());
    let state = suspended(2, &transport, DispatchTable::new(), &listener);
    let reaper = Arc::new(TimeoutReaper::new(Duration::from_millis(100)));
    reaper.register(&state);

    run_reaper_for(&reaper, Duration::from_millis(4900)).await;

    assert!(listener.events().is_empty());
    assert_eq!(state.lock().expect("state").phase(), AsyncPhase::Started);
    assert_eq!(reaper.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn listener_dispatch_resolves_timeout() {
    let transport = RecordingTransport::new();
    let listener = Arc::new(RecordingListener::resolving(ListenerAction::Dispatch(
        "/timeout-page".into(),
    )));
    let table = DispatchTable::new().route_fn("/timeout-page", |event, _target| {
        event.exchange_mut()?.request_uri = "/timeout-page".into();
        Ok(())
    });
    let state = suspended(3, &transport, table, &listener);
    let reaper = Arc::new(TimeoutReaper::new(Duration::from_millis(100)));
    reaper.register(&state);

    run_reaper_for(&reaper, Duration::from_millis(5100)).await;

    let mut state = state.lock().expect("state");
    assert_eq!(state.phase(), AsyncPhase::Dispatching);
    state.run_dispatch().expect("dispatch runs");
    assert_eq!(state.phase(), AsyncPhase::Ended);
    assert_eq!(state.outcome(), Some(AsyncOutcome::Completed));
    assert_eq!(listener.events(), vec!["timeout", "complete"]);
    assert_eq!(transport.log().status, 200);
}

#[rstest]
fn dispatch_completes_exactly_once_after_the_handler() {
    let transport = RecordingTransport::new();
    let listener = Arc::new(RecordingListener::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let table = DispatchTable::new().route_fn("/render", {
        let seen = Arc::clone(&seen);
        let listener = Arc::clone(&listener);
        move |_event, target| {
            seen.lock().expect("seen").push((target.to_owned(), listener.count("complete")));
            Ok(())
        }
    });
    let state = suspended(4, &transport, table, &listener);
    let mut state = state.lock().expect("state");

    state.dispatch("/render").expect("dispatch");
    state.run_dispatch().expect("run");

    assert_eq!(*seen.lock().expect("seen"), vec![("/render".to_owned(), 0)]);
    assert_eq!(listener.count("complete"), 1);
    assert_eq!(transport.log().finished, 1);
}

#[rstest]
fn failing_listener_is_logged_and_skipped(mut logger: LoggerHandle) {
    struct Refuses;

    impl AsyncListener for Refuses {
        fn on_complete(
            &self,
            _event: &mut duplexwire::AsyncEvent<'_>,
        ) -> Result<(), duplexwire::panic::CallbackError> {
            Err("listener refused".into())
        }
    }

    let transport = RecordingTransport::new();
    let recorder = Arc::new(RecordingListener::new());
    let mut state = AsyncRequestState::new(RequestId::new(5), transport.boxed(), Arc::new(DispatchTable::new()));
    state
        .start([Arc::new(Refuses) as Arc<dyn AsyncListener>, Arc::clone(&recorder) as Arc<dyn AsyncListener>])
        .expect("start");
    state.complete().expect("complete");

    assert_eq!(recorder.count("complete"), 1);
    let warnings = logger.drain_at(log::Level::Warn);
    assert!(
        warnings.iter().any(|message| message.contains("listener refused")),
        "missing listener warning in {warnings:?}"
    );
}

#[rstest]
fn panicking_task_is_logged_and_the_request_survives(mut logger: LoggerHandle) {
    let transport = RecordingTransport::new();
    let mut state = AsyncRequestState::new(RequestId::new(6), transport.boxed(), Arc::new(DispatchTable::new()))
        .with_executor(Arc::new(InlineExecutor));
    state.start([]).expect("start");

    state.start_task(|| panic!("task exploded")).expect("start task");

    assert_eq!(state.phase(), AsyncPhase::Started);
    let warnings = logger.drain_at(log::Level::Warn);
    assert!(
        warnings
            .iter()
            .any(|message| message.contains("async task failed") && message.contains("task exploded")),
        "missing task warning in {warnings:?}"
    );
    state.complete().expect("complete");
    assert_eq!(transport.log().ended, 1);
}
