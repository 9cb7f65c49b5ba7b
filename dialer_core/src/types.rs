//! Domain types shared by the engine boundary and the coordinator

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Marker bit for phases where the engine waits on the caller
const PAUSED_BASE: u32 = 0x1000;
/// Marker bit for phases that end the dial
const DONE_BASE: u32 = 0x2000;

/// Opaque native identifier of an in-progress or established connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(usize);

impl ConnectionHandle {
    /// The null handle; never a valid connection
    pub const NULL: ConnectionHandle = ConnectionHandle(0);

    /// Wrap a raw handle, rejecting null
    pub fn new(raw: usize) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn raw(&self) -> usize {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Phases reported by the engine while a connection is being established.
///
/// The order follows the engine's own numbering. `Connected` is the only
/// terminal-success phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionState {
    OpenPort,
    PortOpened,
    ConnectDevice,
    DeviceConnected,
    AllDevicesConnected,
    Authenticate,
    AuthNotify,
    AuthRetry,
    AuthCallback,
    AuthChangePassword,
    AuthProject,
    AuthLinkSpeed,
    AuthAck,
    ReAuthenticate,
    Authenticated,
    PrepareForCallback,
    WaitForModemReset,
    WaitForCallback,
    Projected,
    StartAuthentication,
    CallbackComplete,
    LogonNetwork,
    SubEntryConnected,
    SubEntryDisconnected,
    Interactive,
    RetryAuthentication,
    CallbackSetByCaller,
    PasswordExpired,
    InvokeEapUi,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Every phase, in native order
    pub const ALL: [ConnectionState; 31] = [
        ConnectionState::OpenPort,
        ConnectionState::PortOpened,
        ConnectionState::ConnectDevice,
        ConnectionState::DeviceConnected,
        ConnectionState::AllDevicesConnected,
        ConnectionState::Authenticate,
        ConnectionState::AuthNotify,
        ConnectionState::AuthRetry,
        ConnectionState::AuthCallback,
        ConnectionState::AuthChangePassword,
        ConnectionState::AuthProject,
        ConnectionState::AuthLinkSpeed,
        ConnectionState::AuthAck,
        ConnectionState::ReAuthenticate,
        ConnectionState::Authenticated,
        ConnectionState::PrepareForCallback,
        ConnectionState::WaitForModemReset,
        ConnectionState::WaitForCallback,
        ConnectionState::Projected,
        ConnectionState::StartAuthentication,
        ConnectionState::CallbackComplete,
        ConnectionState::LogonNetwork,
        ConnectionState::SubEntryConnected,
        ConnectionState::SubEntryDisconnected,
        ConnectionState::Interactive,
        ConnectionState::RetryAuthentication,
        ConnectionState::CallbackSetByCaller,
        ConnectionState::PasswordExpired,
        ConnectionState::InvokeEapUi,
        ConnectionState::Connected,
        ConnectionState::Disconnected,
    ];

    /// Native numeric value of this phase
    pub fn raw(&self) -> u32 {
        use ConnectionState::*;
        match self {
            OpenPort => 0,
            PortOpened => 1,
            ConnectDevice => 2,
            DeviceConnected => 3,
            AllDevicesConnected => 4,
            Authenticate => 5,
            AuthNotify => 6,
            AuthRetry => 7,
            AuthCallback => 8,
            AuthChangePassword => 9,
            AuthProject => 10,
            AuthLinkSpeed => 11,
            AuthAck => 12,
            ReAuthenticate => 13,
            Authenticated => 14,
            PrepareForCallback => 15,
            WaitForModemReset => 16,
            WaitForCallback => 17,
            Projected => 18,
            StartAuthentication => 19,
            CallbackComplete => 20,
            LogonNetwork => 21,
            SubEntryConnected => 22,
            SubEntryDisconnected => 23,
            Interactive => PAUSED_BASE,
            RetryAuthentication => PAUSED_BASE + 1,
            CallbackSetByCaller => PAUSED_BASE + 2,
            PasswordExpired => PAUSED_BASE + 3,
            InvokeEapUi => PAUSED_BASE + 4,
            Connected => DONE_BASE,
            Disconnected => DONE_BASE + 1,
        }
    }

    /// Decode a native phase value
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.raw() == raw)
    }

    /// Look up a phase by its name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| format!("{:?}", state).eq_ignore_ascii_case(name))
    }

    /// Whether this phase means the connection was established
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the engine is waiting on the caller in this phase
    pub fn is_paused(&self) -> bool {
        (PAUSED_BASE..DONE_BASE).contains(&self.raw())
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One callback invocation from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub sub_entry: u32,
    /// Handle as reported by the engine; may be null before the dial has one
    pub handle: ConnectionHandle,
    pub message: u32,
    pub phase: ConnectionState,
    pub error_code: u32,
    pub extended_error: u32,
}

impl ProgressReport {
    /// A successful report for `phase` on the primary entry
    pub fn phase(phase: ConnectionState) -> Self {
        Self {
            sub_entry: 0,
            handle: ConnectionHandle::NULL,
            message: 0,
            phase,
            error_code: 0,
            extended_error: 0,
        }
    }

    /// A failed report for `phase`
    pub fn failure(phase: ConnectionState, error_code: u32, extended_error: u32) -> Self {
        Self {
            error_code,
            extended_error,
            ..Self::phase(phase)
        }
    }

    pub fn with_handle(mut self, handle: ConnectionHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }
}

/// An active connection as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub handle: ConnectionHandle,
    pub entry_name: String,
    pub phone_book_path: Option<PathBuf>,
    pub device_name: String,
    pub device_type: String,
    pub connection_id: u64,
}

impl ActiveConnection {
    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
