//! Integration tests for Dialer Core
//!
//! These tests drive full dials through the coordinator against the
//! simulated engine, whose callbacks arrive on threads it owns.

use dialer_core::{
    completion_channel, ActiveConnection, ConnectionEnumerator, ConnectionHandle, ConnectionHangUp,
    ConnectionState, CoordinatorState, DialCallback, DialCallbackCoordinator, DialEngine, DialEvent,
    DialRequest, Dialer, DialerError, NativeErrorTable, ProgressReport,
    RuntimeCancellationSourceFactory, SimulatedEngine, DEFAULT_SCRIPT,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_engine() -> SimulatedEngine {
    SimulatedEngine::builder().delay(Duration::from_millis(2)).build()
}

fn dialer_for(engine: &Arc<SimulatedEngine>) -> Dialer {
    Dialer::new(Arc::clone(engine), Arc::new(NativeErrorTable::new())).unwrap()
}

/// A full dial walks every phase and yields the live connection
#[tokio::test(flavor = "multi_thread")]
async fn test_successful_dial() {
    let engine = Arc::new(fast_engine());
    let dialer = dialer_for(&engine);
    let mut events = dialer.subscribe();

    let connection = dialer
        .dial(&DialRequest::new("Office VPN"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(connection.entry_name, "Office VPN");
    assert_eq!(dialer.state(), CoordinatorState::Completed);
    assert_eq!(dialer.active_connections().unwrap(), vec![connection.clone()]);
    assert!(engine.hang_ups().is_empty());

    let mut phases = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            DialEvent::StateChanged { state } => phases.push(state),
            DialEvent::Completed => break,
        }
    }
    assert_eq!(phases, DEFAULT_SCRIPT.to_vec());
}

/// An error report fails the dial and hangs up exactly once
#[tokio::test(flavor = "multi_thread")]
async fn test_authentication_failure_hangs_up() {
    let engine = Arc::new(
        SimulatedEngine::builder()
            .delay(Duration::from_millis(2))
            .fail_at(ConnectionState::Authenticate, 691)
            .build(),
    );
    let dialer = dialer_for(&engine);

    let err = dialer
        .dial(&DialRequest::new("Office VPN"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(691));
    assert!(err.to_string().contains("username or password"));
    assert_eq!(engine.hang_ups().len(), 1);
    assert!(dialer.active_connections().unwrap().is_empty());
}

/// A connected phase without a matching live connection is an integrity failure
#[tokio::test(flavor = "multi_thread")]
async fn test_missing_connection_is_integrity_error() {
    let engine = Arc::new(
        SimulatedEngine::builder()
            .delay(Duration::from_millis(2))
            .omit_connection()
            .build(),
    );
    let dialer = dialer_for(&engine);

    let err = dialer
        .dial(&DialRequest::new("Office VPN"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DialerError::Integrity(_)));
    assert_eq!(engine.hang_ups().len(), 1);
}

/// Cancelling mid-dial returns Cancelled and hangs up in the background
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_mid_dial() {
    let engine = Arc::new(SimulatedEngine::builder().delay(Duration::from_millis(30)).build());
    let dialer = dialer_for(&engine);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            token.cancel();
        })
    };

    let err = dialer.dial(&DialRequest::new("Office VPN"), &token).await.unwrap_err();
    canceller.await.unwrap();
    assert!(err.is_cancelled());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let hang_ups = engine.hang_ups();
    assert_eq!(hang_ups.len(), 1);
    assert!(!engine.is_dialing(hang_ups[0]));
    assert!(dialer.active_connections().unwrap().is_empty());
}

/// Reports that arrive before the handle wait for it
#[tokio::test(flavor = "multi_thread")]
async fn test_reports_before_handle() {
    let engine = Arc::new(
        SimulatedEngine::builder()
            .script(vec![ConnectionState::OpenPort, ConnectionState::Connected])
            .delay(Duration::from_millis(1))
            .handle_delay(Duration::from_millis(100))
            .build(),
    );
    let dialer = dialer_for(&engine);

    let connection = dialer
        .dial(&DialRequest::new("Branch"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(connection.entry_name, "Branch");
    assert!(engine.hang_ups().is_empty());
}

/// Cancelling before the handle exists still hangs up once it arrives
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_before_handle() {
    let engine = Arc::new(
        SimulatedEngine::builder()
            .delay(Duration::from_millis(1))
            .handle_delay(Duration::from_millis(150))
            .build(),
    );
    let dialer = dialer_for(&engine);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            token.cancel();
        })
    };

    let err = dialer.dial(&DialRequest::new("Branch"), &token).await.unwrap_err();
    canceller.await.unwrap();
    assert_eq!(err, DialerError::Cancelled);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.hang_ups().len(), 1);
}

/// A dialer can run several dials one after another
#[tokio::test(flavor = "multi_thread")]
async fn test_sequential_dials() {
    let engine = Arc::new(fast_engine());
    let dialer = dialer_for(&engine);

    let first = dialer
        .dial(&DialRequest::new("First"), &CancellationToken::new())
        .await
        .unwrap();
    let second = dialer
        .dial(&DialRequest::new("Second"), &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(first.handle, second.handle);
    assert_eq!(dialer.active_connections().unwrap().len(), 2);

    dialer.hang_up(first.handle).unwrap();
    let remaining = dialer.active_connections().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].entry_name, "Second");
}

/// Cancelling a finished dial leaves the connection up
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_after_completion_keeps_connection() {
    let engine = Arc::new(fast_engine());
    let dialer = dialer_for(&engine);
    let token = CancellationToken::new();

    dialer.dial(&DialRequest::new("Office VPN"), &token).await.unwrap();
    token.cancel();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.hang_ups().is_empty());
    assert_eq!(dialer.active_connections().unwrap().len(), 1);
}

/// The coordinator can be driven by hand, the way a native binding would
#[tokio::test(flavor = "multi_thread")]
async fn test_coordinator_with_manual_reports() {
    let engine = Arc::new(fast_engine());
    let coordinator = Arc::new(DialCallbackCoordinator::new(
        engine.clone(),
        engine.clone(),
        Arc::new(NativeErrorTable::new()),
        Arc::new(RuntimeCancellationSourceFactory::current().unwrap()),
    ));

    let (source, outcome) = completion_channel();
    let seen = Arc::new(AtomicUsize::new(0));
    let on_state_changed = {
        let seen = Arc::clone(&seen);
        move |_state: ConnectionState| -> dialer_core::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };
    coordinator
        .initialize(source, on_state_changed, || {}, &CancellationToken::new())
        .unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Initialized);

    let callback: DialCallback = {
        let coordinator = Arc::clone(&coordinator);
        Arc::new(move |report: ProgressReport| coordinator.on_callback(report).unwrap_or(false))
    };
    let handle = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.begin_dial(&DialRequest::new("Manual"), callback))
        .await
        .unwrap()
        .unwrap()
    };
    coordinator.set_handle(handle).unwrap();

    let connection = outcome.await.unwrap();
    assert_eq!(connection.handle, handle);
    assert_eq!(seen.load(Ordering::SeqCst), DEFAULT_SCRIPT.len());
    assert_eq!(coordinator.state(), CoordinatorState::Completed);

    coordinator.dispose();
    assert_eq!(coordinator.state(), CoordinatorState::Disposed);
    assert_eq!(
        coordinator.set_handle(ConnectionHandle::new(1).unwrap()),
        Err(DialerError::Disposed)
    );
}

/// Collaborator that records hang-ups and serves a fixed connection list
#[derive(Default)]
struct RecordingEngine {
    connections: Mutex<Vec<ActiveConnection>>,
    hang_ups: Mutex<Vec<ConnectionHandle>>,
}

impl ConnectionHangUp for RecordingEngine {
    fn hang_up(&self, handle: ConnectionHandle, _token: &CancellationToken) -> dialer_core::Result<()> {
        self.hang_ups.lock().push(handle);
        Ok(())
    }
}

impl ConnectionEnumerator for RecordingEngine {
    fn enumerate_connections(&self) -> dialer_core::Result<Vec<ActiveConnection>> {
        Ok(self.connections.lock().clone())
    }
}

fn recording_coordinator(engine: &Arc<RecordingEngine>) -> Arc<DialCallbackCoordinator> {
    Arc::new(DialCallbackCoordinator::new(
        engine.clone(),
        engine.clone(),
        Arc::new(NativeErrorTable::new()),
        Arc::new(RuntimeCancellationSourceFactory::current().unwrap()),
    ))
}

/// An error report that beats the handle fails the session with that handle hung up
#[tokio::test(flavor = "multi_thread")]
async fn test_error_report_before_handle() {
    let engine = Arc::new(RecordingEngine::default());
    let coordinator = recording_coordinator(&engine);
    let (source, outcome) = completion_channel();
    coordinator
        .initialize(source, |_| Ok(()), || {}, &CancellationToken::new())
        .unwrap();

    let reporter = {
        let coordinator = Arc::clone(&coordinator);
        std::thread::spawn(move || {
            coordinator.on_callback(ProgressReport::failure(
                ConnectionState::ConnectDevice,
                678,
                0,
            ))
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reporter.is_finished());
    let handle = ConnectionHandle::new(0x77).unwrap();
    coordinator.set_handle(handle).unwrap();

    assert_eq!(reporter.join().unwrap(), Ok(false));
    let err = outcome.await.unwrap_err();
    assert_eq!(err.code(), Some(678));
    assert_eq!(*engine.hang_ups.lock(), vec![handle]);
}

/// A replaced session never hangs up the next session's handle
#[tokio::test(flavor = "multi_thread")]
async fn test_reinitialize_isolates_sessions() {
    let engine = Arc::new(RecordingEngine::default());
    let coordinator = recording_coordinator(&engine);
    let first_token = CancellationToken::new();

    let (first_source, first_outcome) = completion_channel();
    coordinator
        .initialize(first_source, |_| Ok(()), || {}, &first_token)
        .unwrap();

    let (second_source, _second_outcome) = completion_channel();
    coordinator
        .initialize(second_source, |_| Ok(()), || {}, &CancellationToken::new())
        .unwrap();
    coordinator.set_handle(ConnectionHandle::new(0x88).unwrap()).unwrap();

    first_token.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(engine.hang_ups.lock().is_empty());
    assert_eq!(coordinator.state(), CoordinatorState::Initialized);

    // The retired session's outcome is abandoned, not cancelled
    let first = tokio::time::timeout(Duration::from_secs(1), first_outcome).await.unwrap();
    assert_eq!(first, Err(DialerError::Abandoned));
}
