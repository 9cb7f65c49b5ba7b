//! End-to-end dialing on top of the coordinator
//!
//! A [`Dialer`] owns one [`DialCallbackCoordinator`] and runs one dial at a
//! time: it starts a session, asks the engine to begin dialing on a blocking
//! thread, forwards the engine's handle and awaits the session's outcome.

use crate::cancellation::RuntimeCancellationSourceFactory;
use crate::completion::completion_channel;
use crate::coordinator::{CoordinatorState, DialCallbackCoordinator};
use crate::error::{DialerError, Result};
use crate::native::{ConnectionEnumerator, ConnectionHangUp, ErrorMapper};
use crate::types::{ActiveConnection, ConnectionHandle, ConnectionState, ProgressReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the event channel handed out by [`Dialer::subscribe`]
const EVENT_CAPACITY: usize = 64;

/// Progress callback handed to the engine. Returns whether the engine
/// should keep reporting.
pub type DialCallback = Arc<dyn Fn(ProgressReport) -> bool + Send + Sync>;

/// A native engine able to start a dial
pub trait DialEngine: Send + Sync {
    /// Begin dialing `request`.
    ///
    /// The engine may invoke `callback` from its own threads at any time,
    /// including before this method returns the handle.
    fn begin_dial(&self, request: &DialRequest, callback: DialCallback) -> Result<ConnectionHandle>;
}

/// What to dial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialRequest {
    pub entry_name: String,
    pub phone_book_path: Option<PathBuf>,
    pub sub_entry: u32,
}

impl DialRequest {
    pub fn new(entry_name: &str) -> Self {
        Self {
            entry_name: entry_name.to_string(),
            phone_book_path: None,
            sub_entry: 0,
        }
    }

    pub fn with_phone_book(mut self, path: impl Into<PathBuf>) -> Self {
        self.phone_book_path = Some(path.into());
        self
    }

    pub fn with_sub_entry(mut self, sub_entry: u32) -> Self {
        self.sub_entry = sub_entry;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.entry_name.trim().is_empty() {
            return Err(DialerError::Argument("entry name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Events emitted while a dial is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialEvent {
    StateChanged { state: ConnectionState },
    Completed,
}

/// Clears the busy flag when a dial ends, including when its future is dropped
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs dials against an engine, one at a time
pub struct Dialer {
    engine: Arc<dyn DialEngine>,
    hang_up: Arc<dyn ConnectionHangUp>,
    connections: Arc<dyn ConnectionEnumerator>,
    coordinator: Arc<DialCallbackCoordinator>,
    events: broadcast::Sender<DialEvent>,
    busy: Arc<AtomicBool>,
}

impl Dialer {
    /// Create a dialer for `engine`. Must be called within a tokio runtime,
    /// which hosts cancellation hang-ups.
    pub fn new<E>(engine: Arc<E>, errors: Arc<dyn ErrorMapper>) -> Result<Self>
    where
        E: DialEngine + ConnectionHangUp + ConnectionEnumerator + 'static,
    {
        let factory = RuntimeCancellationSourceFactory::current()?;
        let coordinator = DialCallbackCoordinator::new(
            engine.clone(),
            engine.clone(),
            errors,
            Arc::new(factory),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            engine: engine.clone(),
            hang_up: engine.clone(),
            connections: engine,
            coordinator: Arc::new(coordinator),
            events,
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Receive state changes of subsequent dials
    pub fn subscribe(&self) -> broadcast::Receiver<DialEvent> {
        self.events.subscribe()
    }

    /// Whether a dial is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    /// Dial `request` and wait for the connection.
    ///
    /// Cancelling `token` aborts the dial; the engine is hung up in the
    /// background and the call returns [`DialerError::Cancelled`].
    pub async fn dial(&self, request: &DialRequest, token: &CancellationToken) -> Result<ActiveConnection> {
        request.validate()?;
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(DialerError::InvalidState("a dial is already in progress".to_string()));
        }
        let _busy = BusyGuard(Arc::clone(&self.busy));

        let (source, completion) = completion_channel();
        let on_state_changed = {
            let events = self.events.clone();
            move |state: ConnectionState| -> Result<()> {
                let _ = events.send(DialEvent::StateChanged { state });
                Ok(())
            }
        };
        let on_completed = {
            let events = self.events.clone();
            move || {
                let _ = events.send(DialEvent::Completed);
            }
        };
        self.coordinator
            .initialize(source, on_state_changed, on_completed, token)?;

        let callback: DialCallback = {
            let coordinator = Arc::clone(&self.coordinator);
            Arc::new(move |report: ProgressReport| match coordinator.on_callback(report) {
                Ok(keep_going) => keep_going,
                Err(e) => {
                    debug!("Stopping engine callbacks: {}", e);
                    false
                }
            })
        };

        info!("Dialing {}", request.entry_name);
        let engine = Arc::clone(&self.engine);
        let owned = request.clone();
        let started = tokio::task::spawn_blocking(move || engine.begin_dial(&owned, callback))
            .await
            .map_err(|e| DialerError::Engine(format!("Dial task failed: {}", e)))?;

        match started {
            Ok(handle) => self.coordinator.set_handle(handle)?,
            Err(e) => {
                warn!("Engine refused to dial {}: {}", request.entry_name, e);
                if let Err(retire) = self.coordinator.fail(e.clone()) {
                    debug!("Could not retire refused dial session: {}", retire);
                }
                return Err(e);
            }
        }

        completion.await
    }

    /// Hang up an established connection
    pub fn hang_up(&self, handle: ConnectionHandle) -> Result<()> {
        self.hang_up.hang_up(handle, &CancellationToken::new())
    }

    /// Connections the engine currently reports
    pub fn active_connections(&self) -> Result<Vec<ActiveConnection>> {
        self.connections.enumerate_connections()
    }
}

impl Drop for Dialer {
    fn drop(&mut self) {
        self.coordinator.dispose();
    }
}
