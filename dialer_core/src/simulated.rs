//! In-process dial engine
//!
//! [`SimulatedEngine`] behaves like a native remote-access engine: it reports
//! phases on a thread it owns, may call back before the initiating call has
//! returned the handle, keeps a list of live connections and honours
//! hang-ups. It backs the CLI and the integration tests.

use crate::dialer::{DialCallback, DialEngine, DialRequest};
use crate::error::{DialerError, Result};
use crate::native::{ConnectionEnumerator, ConnectionHangUp, ErrorMapper, NativeErrorTable};
use crate::types::{ActiveConnection, ConnectionHandle, ConnectionState, ProgressReport};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default time between two progress reports
pub const DEFAULT_PHASE_DELAY: Duration = Duration::from_millis(150);

/// Phases reported by a typical VPN dial
pub const DEFAULT_SCRIPT: [ConnectionState; 10] = [
    ConnectionState::OpenPort,
    ConnectionState::PortOpened,
    ConnectionState::ConnectDevice,
    ConnectionState::DeviceConnected,
    ConnectionState::AllDevicesConnected,
    ConnectionState::Authenticate,
    ConnectionState::AuthNotify,
    ConnectionState::AuthAck,
    ConnectionState::Authenticated,
    ConnectionState::Connected,
];

/// Handles start here so they never collide with small test values
const FIRST_HANDLE: usize = 0x1000;

#[derive(Default)]
struct EngineState {
    dialing: HashSet<ConnectionHandle>,
    aborted: HashSet<ConnectionHandle>,
    connections: Vec<ActiveConnection>,
    hang_ups: Vec<ConnectionHandle>,
}

/// Builder for [`SimulatedEngine`]
#[derive(Debug, Clone)]
pub struct SimulatedEngineBuilder {
    script: Vec<ConnectionState>,
    delay: Duration,
    handle_delay: Duration,
    failure: Option<(ConnectionState, u32, u32)>,
    refusal: Option<u32>,
    omit_connection: bool,
    device_name: String,
    device_type: String,
}

impl Default for SimulatedEngineBuilder {
    fn default() -> Self {
        Self {
            script: DEFAULT_SCRIPT.to_vec(),
            delay: DEFAULT_PHASE_DELAY,
            handle_delay: Duration::ZERO,
            failure: None,
            refusal: None,
            omit_connection: false,
            device_name: "WAN Miniport (IKEv2)".to_string(),
            device_type: "vpn".to_string(),
        }
    }
}

impl SimulatedEngineBuilder {
    /// Phases to report, in order
    pub fn script(mut self, script: Vec<ConnectionState>) -> Self {
        self.script = script;
        self
    }

    /// Time to wait before each report
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold the handle back this long after reporting has started
    pub fn handle_delay(mut self, delay: Duration) -> Self {
        self.handle_delay = delay;
        self
    }

    /// Report `code` instead of success when `phase` is reached
    pub fn fail_at(mut self, phase: ConnectionState, code: u32) -> Self {
        self.failure = Some((phase, code, 0));
        self
    }

    /// Like [`fail_at`](Self::fail_at) with an extended error code
    pub fn fail_at_extended(mut self, phase: ConnectionState, code: u32, extended: u32) -> Self {
        self.failure = Some((phase, code, extended));
        self
    }

    /// Make `begin_dial` itself fail with `code`
    pub fn refuse_dial(mut self, code: u32) -> Self {
        self.refusal = Some(code);
        self
    }

    /// Report `Connected` without registering a live connection
    pub fn omit_connection(mut self) -> Self {
        self.omit_connection = true;
        self
    }

    pub fn device(mut self, name: &str, device_type: &str) -> Self {
        self.device_name = name.to_string();
        self.device_type = device_type.to_string();
        self
    }

    pub fn build(self) -> SimulatedEngine {
        SimulatedEngine {
            config: Arc::new(self),
            state: Arc::new(Mutex::new(EngineState::default())),
            next_handle: AtomicUsize::new(FIRST_HANDLE),
            errors: NativeErrorTable::new(),
        }
    }
}

/// A dial engine that runs entirely in-process
pub struct SimulatedEngine {
    config: Arc<SimulatedEngineBuilder>,
    state: Arc<Mutex<EngineState>>,
    next_handle: AtomicUsize,
    errors: NativeErrorTable,
}

impl SimulatedEngine {
    pub fn builder() -> SimulatedEngineBuilder {
        SimulatedEngineBuilder::default()
    }

    /// Every handle passed to `hang_up`, in call order
    pub fn hang_ups(&self) -> Vec<ConnectionHandle> {
        self.state.lock().hang_ups.clone()
    }

    /// Whether a dial for `handle` is still reporting
    pub fn is_dialing(&self, handle: ConnectionHandle) -> bool {
        self.state.lock().dialing.contains(&handle)
    }
}

impl DialEngine for SimulatedEngine {
    fn begin_dial(&self, request: &DialRequest, callback: DialCallback) -> Result<ConnectionHandle> {
        if let Some(code) = self.config.refusal {
            return Err(self.errors.map_error(code, 0));
        }

        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::new(raw)
            .ok_or_else(|| DialerError::Engine("handle space exhausted".to_string()))?;
        self.state.lock().dialing.insert(handle);

        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let owned = request.clone();
        thread::Builder::new()
            .name(format!("sim-dial-{}", handle))
            .spawn(move || run_dial(handle, &owned, &config, &state, callback))
            .map_err(|e| DialerError::Engine(format!("Failed to start dial thread: {}", e)))?;

        info!("Simulated dial of {} started as {}", request.entry_name, handle);
        if !self.config.handle_delay.is_zero() {
            thread::sleep(self.config.handle_delay);
        }
        Ok(handle)
    }
}

fn run_dial(
    handle: ConnectionHandle,
    request: &DialRequest,
    config: &SimulatedEngineBuilder,
    state: &Mutex<EngineState>,
    callback: DialCallback,
) {
    for &phase in &config.script {
        thread::sleep(config.delay);
        if state.lock().aborted.contains(&handle) {
            debug!("Dial {} aborted before {}", handle, phase);
            break;
        }

        let report = match config.failure {
            Some((at, code, extended)) if at == phase => ProgressReport::failure(phase, code, extended),
            _ => ProgressReport::phase(phase),
        };
        let report = ProgressReport {
            sub_entry: request.sub_entry,
            ..report.with_handle(handle)
        };

        if phase.is_terminal_success() && !report.is_error() && !config.omit_connection {
            let connection = ActiveConnection {
                handle,
                entry_name: request.entry_name.clone(),
                phone_book_path: request.phone_book_path.clone(),
                device_name: config.device_name.clone(),
                device_type: config.device_type.clone(),
                connection_id: handle.raw() as u64,
            };
            state.lock().connections.push(connection);
        }

        if !callback(report) || report.is_error() {
            break;
        }
    }

    state.lock().dialing.remove(&handle);
    debug!("Dial {} stopped reporting", handle);
}

impl ConnectionHangUp for SimulatedEngine {
    fn hang_up(&self, handle: ConnectionHandle, _token: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock();
        state.hang_ups.push(handle);

        let live = state.connections.len();
        state.connections.retain(|connection| connection.handle != handle);
        let was_connected = state.connections.len() < live;
        let was_dialing = state.dialing.contains(&handle);

        if !was_connected && !was_dialing {
            return Err(self.errors.map_error(606, 0));
        }

        state.aborted.insert(handle);
        info!("Simulated connection {} hung up", handle);
        Ok(())
    }
}

impl ConnectionEnumerator for SimulatedEngine {
    fn enumerate_connections(&self) -> Result<Vec<ActiveConnection>> {
        Ok(self.state.lock().connections.clone())
    }
}
