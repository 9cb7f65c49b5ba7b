//! Single-assignment result delivery
//!
//! [`CompletionSource`] is the producer half, completed from whatever thread
//! the engine calls back on. [`CompletionFuture`] is the consumer half and
//! can be awaited from any async context.

use crate::error::{DialerError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Create a linked completion source and future
pub fn completion_channel<T>() -> (CompletionSource<T>, CompletionFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSource {
            sender: Mutex::new(Some(tx)),
        },
        CompletionFuture { receiver: rx },
    )
}

/// Producer half of a single-assignment future
#[derive(Debug)]
pub struct CompletionSource<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> CompletionSource<T> {
    /// Complete with a value. Returns `false` if already completed.
    pub fn set_result(&self, value: T) -> bool {
        self.complete(Ok(value), "result")
    }

    /// Complete with an error. Returns `false` if already completed.
    pub fn set_exception(&self, error: DialerError) -> bool {
        self.complete(Err(error), "error")
    }

    /// Complete as cancelled. Returns `false` if already completed.
    pub fn set_cancelled(&self) -> bool {
        self.complete(Err(DialerError::Cancelled), "cancellation")
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn complete(&self, outcome: Result<T>, kind: &str) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            warn!("Ignoring {} for a completion source that is already completed", kind);
            return false;
        };

        if sender.send(outcome).is_err() {
            debug!("Completion {} delivered after the consumer went away", kind);
        }
        true
    }
}

/// Consumer half of a single-assignment future.
///
/// Resolves to [`DialerError::Abandoned`] if the source is dropped without
/// being completed.
#[derive(Debug)]
pub struct CompletionFuture<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DialerError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test]
    async fn test_result_delivered() {
        let (source, future) = completion_channel();
        assert!(source.set_result(5u32));
        assert!(source.is_completed());
        assert_eq!(future.await, Ok(5));
    }

    #[tokio::test]
    async fn test_exception_delivered() {
        let (source, future) = completion_channel::<u32>();
        assert!(source.set_exception(DialerError::Integrity("missing".to_string())));
        assert_eq!(
            future.await,
            Err(DialerError::Integrity("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cancellation_delivered() {
        let (source, future) = completion_channel::<u32>();
        assert!(source.set_cancelled());
        assert_eq!(future.await, Err(DialerError::Cancelled));
    }

    #[tokio::test]
    async fn test_second_completion_is_ignored() {
        let (source, future) = completion_channel();
        assert!(source.set_result(1u32));
        assert!(!source.set_exception(DialerError::Cancelled));
        assert!(!source.set_result(2));
        assert_eq!(future.await, Ok(1));
    }

    #[tokio::test]
    async fn test_dropped_source_abandons_future() {
        let (source, future) = completion_channel::<u32>();
        drop(source);
        assert_eq!(future.await, Err(DialerError::Abandoned));
    }

    #[test]
    fn test_completion_without_consumer_does_not_block() {
        let (source, future) = completion_channel();
        drop(future);
        assert!(source.set_result("done"));
    }

    #[tokio::test]
    async fn test_completed_from_foreign_thread() {
        let (source, future) = completion_channel();
        let producer = thread::spawn(move || source.set_result(10u64));

        assert_eq!(future.await, Ok(10));
        assert!(producer.join().unwrap());
    }
}
