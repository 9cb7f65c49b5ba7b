//! Dial callback coordination
//!
//! [`DialCallbackCoordinator`] sits between a native dial engine and the
//! consumer awaiting the dial. The engine calls [`DialCallbackCoordinator::on_callback`]
//! on its own thread with progress reports, while the initiating call hands
//! over the connection handle through [`DialCallbackCoordinator::set_handle`].
//! The two race; the callback path blocks on the session's handle slot until
//! the handle arrives or the session is cancelled.
//!
//! Each session ends with exactly one outcome on its [`CompletionSource`]:
//! the active connection, an error, or cancellation.

use crate::cancellation::{CancellationSource, CancellationSourceFactory};
use crate::completion::CompletionSource;
use crate::error::{DialerError, Result};
use crate::native::{ConnectionEnumerator, ConnectionHangUp, ErrorMapper};
use crate::types::{ActiveConnection, ConnectionHandle, ConnectionState, ProgressReport};
use crate::waiter::ValueWaiter;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consumer hook invoked with every successfully reported phase
pub type StateChangedCallback = Box<dyn Fn(ConnectionState) -> Result<()> + Send + Sync>;

/// Consumer hook invoked once when a session completes
pub type CompletedCallback = Box<dyn FnOnce() + Send>;

/// Observable lifecycle of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Initialized,
    Active,
    Completed,
    Disposed,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Connected,
    Failed,
    Cancelled,
}

/// Bookkeeping for one dial attempt
struct Session {
    id: u64,
    handle: ValueWaiter<ConnectionHandle>,
    completion: CompletionSource<ActiveConnection>,
    on_state_changed: StateChangedCallback,
    on_completed: Mutex<Option<CompletedCallback>>,
    cancellation: CancellationSource,
    /// Cancelled when the session is replaced or the coordinator is disposed
    lifetime: CancellationToken,
    reports: AtomicUsize,
    ended: Mutex<Option<SessionEnd>>,
}

impl Session {
    fn is_completed(&self) -> bool {
        self.ended.lock().is_some()
    }

    fn ended(&self) -> Option<SessionEnd> {
        *self.ended.lock()
    }

    /// Record how the session ends. Only the first claim wins.
    fn claim(&self, end: SessionEnd) -> bool {
        let mut ended = self.ended.lock();
        if ended.is_some() {
            return false;
        }
        *ended = Some(end);
        true
    }

    /// Deliver the outcome of a claimed session
    fn complete<F>(&self, deliver: F)
    where
        F: FnOnce(&CompletionSource<ActiveConnection>) -> bool,
    {
        deliver(&self.completion);
        // Cancelling a finished session must not hang up the connection
        self.cancellation.dispose();
        self.notify_completed();
    }

    /// Claim and deliver in one step. Returns whether this call completed
    /// the session.
    fn finish<F>(&self, end: SessionEnd, deliver: F) -> bool
    where
        F: FnOnce(&CompletionSource<ActiveConnection>) -> bool,
    {
        if !self.claim(end) {
            return false;
        }
        self.complete(deliver);
        true
    }

    fn notify_state_changed(&self, phase: ConnectionState) -> Result<()> {
        (self.on_state_changed)(phase)
    }

    fn notify_completed(&self) {
        let Some(on_completed) = self.on_completed.lock().take() else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(on_completed)) {
            warn!(
                session = self.id,
                "Completion hook panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }

    /// Detach the session from the coordinator. A pending cancellation action
    /// that has not fired is released; blocked waiters are woken.
    fn retire(&self) {
        self.cancellation.dispose();
        self.cancellation.cancel();
        self.lifetime.cancel();
        self.handle.dispose();
    }
}

/// Translates a native engine's callback stream into a single dial outcome
pub struct DialCallbackCoordinator {
    hang_up: Arc<dyn ConnectionHangUp>,
    connections: Arc<dyn ConnectionEnumerator>,
    errors: Arc<dyn ErrorMapper>,
    cancellation: Arc<dyn CancellationSourceFactory>,
    session: Mutex<Option<Arc<Session>>>,
    next_session: AtomicU64,
    disposed: AtomicBool,
}

impl DialCallbackCoordinator {
    /// Create a coordinator over the engine's collaborators
    pub fn new(
        hang_up: Arc<dyn ConnectionHangUp>,
        connections: Arc<dyn ConnectionEnumerator>,
        errors: Arc<dyn ErrorMapper>,
        cancellation: Arc<dyn CancellationSourceFactory>,
    ) -> Self {
        Self {
            hang_up,
            connections,
            errors,
            cancellation,
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        }
    }

    /// Start a new session.
    ///
    /// Any previous session is retired first. Cancelling `token` (or the
    /// session's own source) hangs up the dial asynchronously once its
    /// handle is known.
    pub fn initialize<S, C>(
        &self,
        completion: CompletionSource<ActiveConnection>,
        on_state_changed: S,
        on_completed: C,
        token: &CancellationToken,
    ) -> Result<()>
    where
        S: Fn(ConnectionState) -> Result<()> + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        if completion.is_completed() {
            return Err(DialerError::Argument(
                "completion source is already completed".to_string(),
            ));
        }

        let mut current = self.session.lock();
        if self.disposed.load(Ordering::Acquire) {
            return Err(DialerError::Disposed);
        }

        if let Some(previous) = current.take() {
            if !previous.is_completed() {
                warn!(session = previous.id, "Replacing a dial session that never completed");
            }
            previous.retire();
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            id,
            handle: ValueWaiter::new(),
            completion,
            on_state_changed: Box::new(on_state_changed),
            on_completed: Mutex::new(Some(Box::new(on_completed))),
            cancellation: self.cancellation.create(token),
            lifetime: CancellationToken::new(),
            reports: AtomicUsize::new(0),
            ended: Mutex::new(None),
        });

        let action = {
            let session = Arc::clone(&session);
            let hang_up = Arc::clone(&self.hang_up);
            move || {
                if session.finish(SessionEnd::Cancelled, |completion| completion.set_cancelled()) {
                    info!(session = session.id, "Dial cancelled");
                }
                // Only a cancelled session is hung up here
                if session.ended() != Some(SessionEnd::Cancelled) {
                    debug!(session = session.id, "Cancelled after the session ended");
                    return;
                }
                match hang_up_when_ready(&session.handle, hang_up.as_ref(), &session.lifetime) {
                    Ok(native) => info!(session = session.id, handle = %native, "Hung up cancelled dial"),
                    Err(e) => warn!(session = session.id, "Could not hang up cancelled dial: {}", e),
                }
            }
        };
        session.cancellation.register(action)?;
        *current = Some(session);

        debug!(session = id, "Dial session initialized");
        Ok(())
    }

    /// Hand over the handle produced by the initiating call
    pub fn set_handle(&self, handle: ConnectionHandle) -> Result<()> {
        if handle.is_null() {
            return Err(DialerError::Argument("handle must not be null".to_string()));
        }

        let session = self.current_session()?;
        match session.handle.set(handle) {
            Ok(()) => {
                debug!(session = session.id, handle = %handle, "Handle set");
                Ok(())
            }
            Err(DialerError::AlreadySet) => Err(DialerError::InvalidState(
                "a handle is already set for this session".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Entry point for the engine's progress callback.
    ///
    /// Returns `Ok(true)` while the engine should keep reporting and
    /// `Ok(false)` once the session has completed. Failures while processing
    /// the report are delivered through the completion source, never
    /// returned here.
    pub fn on_callback(&self, report: ProgressReport) -> Result<bool> {
        let session = self.current_session()?;
        if session.is_completed() {
            debug!(session = session.id, phase = %report.phase, "Ignoring report for completed session");
            return Ok(false);
        }

        session.reports.fetch_add(1, Ordering::AcqRel);
        debug!(
            session = session.id,
            sub_entry = report.sub_entry,
            phase = %report.phase,
            error_code = report.error_code,
            "Progress report"
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(&session, &report)))
            .unwrap_or_else(|payload| Err(DialerError::Callback(panic_message(payload.as_ref()))));

        match outcome {
            Ok(None) => {}
            Ok(Some(connection)) => {
                let handle = connection.handle;
                let connected =
                    session.finish(SessionEnd::Connected, |completion| completion.set_result(connection));
                if connected {
                    info!(session = session.id, handle = %handle, "Dial connected");
                }
            }
            Err(DialerError::Cancelled) => {
                if session.finish(SessionEnd::Cancelled, |completion| completion.set_cancelled()) {
                    info!(session = session.id, "Dial cancelled");
                }
            }
            Err(error) => {
                if session.claim(SessionEnd::Failed) {
                    warn!(session = session.id, "Dial failed: {}", error);
                    self.best_effort_hang_up(&session);
                    session.complete(|completion| completion.set_exception(error));
                }
            }
        }

        Ok(!session.is_completed())
    }

    /// Hang up the current session's dial once its handle is known.
    ///
    /// Waiting is bounded by the session token; a handle that is already set
    /// is hung up even after cancellation.
    pub fn hang_up(&self) -> Result<()> {
        let session = self.current_session()?;
        hang_up_when_ready(&session.handle, self.hang_up.as_ref(), session.cancellation.token())?;
        Ok(())
    }

    /// Fail the current session with `error`, e.g. when the engine refused
    /// to start the dial. Returns whether this call completed the session.
    pub fn fail(&self, error: DialerError) -> Result<bool> {
        let session = self.current_session()?;
        let failed =
            session.finish(SessionEnd::Failed, |completion| completion.set_exception(error));
        // No handle will arrive for this session
        session.lifetime.cancel();
        if failed {
            debug!(session = session.id, "Dial session failed before reporting");
        }
        Ok(failed)
    }

    /// Cancel the current session's derived token without touching the
    /// caller's token
    pub fn cancel(&self) -> Result<()> {
        self.current_session()?.cancellation.cancel();
        Ok(())
    }

    /// Release the current session and refuse further use. Idempotent.
    pub fn dispose(&self) {
        let previous = {
            let mut current = self.session.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            current.take()
        };

        if let Some(session) = previous {
            session.retire();
        }
        debug!("Dial coordinator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CoordinatorState {
        if self.is_disposed() {
            return CoordinatorState::Disposed;
        }
        match self.session.lock().as_ref() {
            None => CoordinatorState::Uninitialized,
            Some(session) if session.is_completed() => CoordinatorState::Completed,
            Some(session) if session.reports.load(Ordering::Acquire) == 0 => {
                CoordinatorState::Initialized
            }
            Some(_) => CoordinatorState::Active,
        }
    }

    fn current_session(&self) -> Result<Arc<Session>> {
        if self.is_disposed() {
            return Err(DialerError::Disposed);
        }
        self.session
            .lock()
            .as_ref()
            .map(Arc::clone)
            .ok_or(DialerError::NotInitialized)
    }

    fn process(&self, session: &Session, report: &ProgressReport) -> Result<Option<ActiveConnection>> {
        let token = session.cancellation.token();
        let handle = session.handle.wait(token)?;
        if token.is_cancelled() {
            return Err(DialerError::Cancelled);
        }

        if report.is_error() {
            return Err(self.errors.map_error(report.error_code, report.extended_error));
        }

        session.notify_state_changed(report.phase)?;

        if !report.phase.is_terminal_success() {
            return Ok(None);
        }

        self.connections
            .enumerate_connections()?
            .into_iter()
            .find(|connection| connection.handle == handle)
            .map(Some)
            .ok_or_else(|| {
                DialerError::Integrity(format!(
                    "engine reported {} but no active connection has handle {}",
                    report.phase, handle
                ))
            })
    }

    fn best_effort_hang_up(&self, session: &Session) {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            hang_up_when_ready(&session.handle, self.hang_up.as_ref(), &session.lifetime)
        }));
        match attempt {
            Ok(Ok(handle)) => debug!(session = session.id, handle = %handle, "Hung up failed dial"),
            Ok(Err(e)) => warn!(session = session.id, "Ignoring hang-up failure: {}", e),
            Err(payload) => warn!(
                session = session.id,
                "Ignoring hang-up panic: {}",
                panic_message(payload.as_ref())
            ),
        }
    }
}

impl Drop for DialCallbackCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Wait for the handle, bounded by `until`, and hang it up. The hang-up
/// itself is not cancellable.
///
/// Internal paths pass the session lifetime, so a handle delivered after
/// cancellation is still hung up.
fn hang_up_when_ready(
    handle: &ValueWaiter<ConnectionHandle>,
    hang_up: &dyn ConnectionHangUp,
    until: &CancellationToken,
) -> Result<ConnectionHandle> {
    let native = handle.wait(until)?;
    hang_up.hang_up(native, &CancellationToken::new())?;
    Ok(native)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}
