//! Boundary to the native connection engine
//!
//! The coordinator never talks to the engine directly. It hangs up, lists
//! connections and translates error codes through these traits, which lets
//! the same coordination logic run against a real engine binding or the
//! simulated engine.

use crate::error::{DialerError, Result};
use crate::types::{ActiveConnection, ConnectionHandle};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

/// Terminates an in-progress or established connection
#[cfg_attr(test, automock)]
pub trait ConnectionHangUp: Send + Sync {
    fn hang_up(&self, handle: ConnectionHandle, token: &CancellationToken) -> Result<()>;
}

/// Lists the connections the engine currently knows about
#[cfg_attr(test, automock)]
pub trait ConnectionEnumerator: Send + Sync {
    fn enumerate_connections(&self) -> Result<Vec<ActiveConnection>>;
}

/// Translates native error codes into structured errors
#[cfg_attr(test, automock)]
pub trait ErrorMapper: Send + Sync {
    fn map_error(&self, code: u32, extended_code: u32) -> DialerError;
}

/// Messages for well-known remote-access error codes
const KNOWN_ERRORS: &[(u32, &str)] = &[
    (600, "An operation is pending"),
    (602, "The port is already open"),
    (603, "The caller's buffer is too small"),
    (604, "Wrong information specified"),
    (606, "The port is not connected"),
    (608, "The device does not exist"),
    (610, "The buffers are not valid"),
    (617, "The port or device is already disconnecting"),
    (619, "A connection to the remote computer could not be established"),
    (623, "The phone book entry could not be found"),
    (624, "The phone book file could not be written"),
    (625, "Invalid information was found in the phone book"),
    (628, "The connection was terminated by the remote computer"),
    (629, "The connection was closed by the remote computer"),
    (630, "The modem was disconnected due to hardware failure"),
    (631, "The user disconnected the modem"),
    (633, "The modem is already in use or is not configured for dialing out"),
    (638, "The remote server is not responding"),
    (645, "An internal authentication error occurred"),
    (649, "The account does not have permission to dial in"),
    (650, "The remote access server is not responding"),
    (651, "The modem reported an error"),
    (652, "There was an unrecognized response from the modem"),
    (676, "The phone line is busy"),
    (677, "A person answered instead of a modem"),
    (678, "There was no answer"),
    (680, "There was no dial tone"),
    (691, "Access was denied because the username or password is not valid"),
    (692, "There was a hardware failure in the modem"),
    (703, "The connection needs information from the user"),
    (718, "The connection timed out waiting for a valid response from the remote computer"),
    (720, "No PPP control protocols were configured"),
    (721, "The remote computer did not respond"),
    (734, "The PPP link control protocol was terminated"),
    (735, "The requested address was rejected by the server"),
    (738, "The server did not assign an address"),
    (741, "The local computer does not support the required data encryption type"),
    (742, "The remote computer does not support the required data encryption type"),
    (752, "A syntax error was encountered while processing a script"),
    (769, "The remote access destination is not reachable"),
    (777, "The connection attempt failed because the modem on the remote computer is out of order"),
    (789, "The L2TP connection attempt failed because of a security layer error"),
    (800, "The VPN connection could not be established"),
    (809, "The network connection could not be established because the remote server is not responding"),
    (812, "The connection was prevented because of a policy on the remote access server"),
    (868, "The remote connection was not made because the name of the server did not resolve"),
];

/// Default [`ErrorMapper`] backed by a table of well-known codes
#[derive(Debug, Clone, Default)]
pub struct NativeErrorTable {
    overrides: HashMap<u32, String>,
}

impl NativeErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the message reported for `code`
    pub fn with_override(mut self, code: u32, message: impl Into<String>) -> Self {
        self.overrides.insert(code, message.into());
        self
    }

    /// Message for a native error code
    pub fn message(&self, code: u32) -> String {
        if let Some(message) = self.overrides.get(&code) {
            return message.clone();
        }

        KNOWN_ERRORS
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, message)| message.to_string())
            .unwrap_or_else(|| format!("Unknown remote access error {}", code))
    }

    /// Whether the code has a dedicated message
    pub fn is_known(&self, code: u32) -> bool {
        self.overrides.contains_key(&code) || KNOWN_ERRORS.iter().any(|(known, _)| *known == code)
    }
}

impl ErrorMapper for NativeErrorTable {
    fn map_error(&self, code: u32, extended_code: u32) -> DialerError {
        DialerError::NativeOperation {
            code,
            extended_code,
            message: self.message(code),
        }
    }
}
