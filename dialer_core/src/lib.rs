//! Dialer Core Library
//!
//! This crate coordinates asynchronous dial-up and VPN connection attempts
//! against a native remote-access engine that reports progress through
//! callbacks on threads it owns.
//!
//! # Architecture
//!
//! The library is organized around a handful of small primitives:
//!
//! - [`waiter`]: a settable-once cell used to hand the connection handle to
//!   callbacks that may arrive before it
//! - [`cancellation`]: a linked cancellation source whose registered action
//!   runs off the cancelling thread
//! - [`completion`]: the producer half of a dial's awaited outcome
//! - [`coordinator`]: the [`DialCallbackCoordinator`] that ties the above
//!   together for one dial session at a time
//! - [`dialer`]: an async front end driving a [`DialEngine`]
//! - [`simulated`]: an in-process engine for tests and the CLI
//!
//! # Example
//!
//! ```no_run
//! use dialer_core::{DialRequest, Dialer, NativeErrorTable, SimulatedEngine};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn connect() -> dialer_core::Result<()> {
//!     let engine = Arc::new(SimulatedEngine::builder().build());
//!     let dialer = Dialer::new(engine, Arc::new(NativeErrorTable::new()))?;
//!
//!     let connection = dialer
//!         .dial(&DialRequest::new("Office VPN"), &CancellationToken::new())
//!         .await?;
//!     println!("Connected on {}", connection.device_name);
//!
//!     dialer.hang_up(connection.handle)?;
//!     Ok(())
//! }
//! ```

pub mod cancellation;
pub mod completion;
pub mod coordinator;
pub mod dialer;
pub mod error;
pub mod native;
pub mod simulated;
pub mod types;
pub mod waiter;

// Re-export commonly used types
pub use cancellation::{CancellationSource, CancellationSourceFactory, RuntimeCancellationSourceFactory};
pub use completion::{completion_channel, CompletionFuture, CompletionSource};
pub use coordinator::{CoordinatorState, DialCallbackCoordinator};
pub use dialer::{DialCallback, DialEngine, DialEvent, DialRequest, Dialer};
pub use error::{DialerError, Result};
pub use native::{ConnectionEnumerator, ConnectionHangUp, ErrorMapper, NativeErrorTable};
pub use simulated::{SimulatedEngine, SimulatedEngineBuilder, DEFAULT_PHASE_DELAY, DEFAULT_SCRIPT};
pub use types::{ActiveConnection, ConnectionHandle, ConnectionState, ProgressReport};
pub use waiter::ValueWaiter;

/// Get the version of the dialer_core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
