//! Error types for Dialer

use thiserror::Error;

/// Main error type for Dialer operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialerError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("The coordinator has not been initialized")]
    NotInitialized,

    #[error("The coordinator has been disposed")]
    Disposed,

    #[error("A value has already been set")]
    AlreadySet,

    #[error("The operation was cancelled")]
    Cancelled,

    #[error("Native error {code} (extended {extended_code}): {message}")]
    NativeOperation {
        code: u32,
        extended_code: u32,
        message: String,
    },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Callback failed: {0}")]
    Callback(String),

    #[error("The completion source was dropped before a result was delivered")]
    Abandoned,

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DialerError {
    /// Whether this error represents cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DialerError::Cancelled)
    }

    /// Native error code, if this error came from the engine
    pub fn code(&self) -> Option<u32> {
        match self {
            DialerError::NativeOperation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DialerError {
    fn from(err: std::io::Error) -> Self {
        DialerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DialerError {
    fn from(err: serde_json::Error) -> Self {
        DialerError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DialerError>;
