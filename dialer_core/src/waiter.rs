//! Single-slot handoff cell
//!
//! A [`ValueWaiter`] carries one value from the thread that produces it to
//! any thread waiting for it. Waiting is bounded by a cancellation token, but
//! a value that is already present always wins over cancellation: a waiter
//! that starts (or wakes) after the value was stored receives it even when
//! its token is cancelled.

use crate::error::{DialerError, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Slot<T> {
    value: Option<T>,
    disposed: bool,
}

impl<T: Clone> Slot<T> {
    /// `None` while nothing has been stored and the slot is still open
    fn resolve(&self) -> Option<Result<T>> {
        match (&self.value, self.disposed) {
            (Some(value), _) => Some(Ok(value.clone())),
            (None, true) => Some(Err(DialerError::Disposed)),
            (None, false) => None,
        }
    }
}

/// Settable-once synchronization cell with a cancellable wait
#[derive(Debug)]
pub struct ValueWaiter<T> {
    slot: watch::Sender<Slot<T>>,
}

impl<T> Default for ValueWaiter<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueWaiter<T>
where
    T: Clone + Send + Sync,
{
    /// Create an empty waiter
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Slot {
            value: None,
            disposed: false,
        });
        Self { slot }
    }

    /// Clear the slot. Only meaningful between sessions, when nobody waits.
    pub fn reset(&self) {
        self.slot.send_if_modified(|slot| {
            if slot.disposed {
                return false;
            }
            slot.value.take().is_some()
        });
    }

    /// Store `value` and release every blocked waiter
    pub fn set(&self, value: T) -> Result<()> {
        let mut outcome = Ok(());
        self.slot.send_if_modified(|slot| {
            if slot.disposed {
                outcome = Err(DialerError::Disposed);
                false
            } else if slot.value.is_some() {
                outcome = Err(DialerError::AlreadySet);
                false
            } else {
                slot.value = Some(value);
                true
            }
        });
        outcome
    }

    /// Whether a value is currently stored
    pub fn is_set(&self) -> bool {
        self.slot.borrow().value.is_some()
    }

    /// The stored value, without waiting
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().value.clone()
    }

    /// Wait for the value without blocking a thread
    pub async fn wait_async(&self, token: &CancellationToken) -> Result<T> {
        let mut rx = self.slot.subscribe();
        let ready = rx.borrow_and_update().resolve();
        if let Some(ready) = ready {
            return ready;
        }

        tokio::select! {
            biased;
            changed = rx.wait_for(|slot| slot.value.is_some() || slot.disposed) => match changed {
                Ok(slot) => slot.resolve().unwrap_or(Err(DialerError::Disposed)),
                Err(_) => Err(DialerError::Disposed),
            },
            _ = token.cancelled() => {
                // A value stored concurrently with cancellation is still delivered
                let current = self.slot.borrow().resolve();
                current.unwrap_or(Err(DialerError::Cancelled))
            }
        }
    }

    /// Block the calling thread until the value arrives or `token` is cancelled
    pub fn wait(&self, token: &CancellationToken) -> Result<T> {
        futures::executor::block_on(self.wait_async(token))
    }

    /// Close the slot. Waiters still receive a value that was already
    /// stored; otherwise they are released with [`DialerError::Disposed`].
    /// Idempotent.
    pub fn dispose(&self) {
        self.slot.send_if_modified(|slot| !std::mem::replace(&mut slot.disposed, true));
    }

    pub fn is_disposed(&self) -> bool {
        self.slot.borrow().disposed
    }
}
