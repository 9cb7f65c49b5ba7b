//! Linked cancellation with a one-shot cancellation action

use crate::error::{DialerError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A cancellation scope derived from a caller's token.
///
/// The derived token is cancelled when the caller's token is cancelled or
/// when [`CancellationSource::cancel`] is called. At most one action can be
/// registered; it runs on the blocking pool of the runtime, never on the
/// thread that cancels.
#[derive(Debug)]
pub struct CancellationSource {
    token: CancellationToken,
    released: CancellationToken,
    runtime: Handle,
    registered: AtomicBool,
    disposed: AtomicBool,
}

impl CancellationSource {
    /// Derive a source from `parent`, running actions on `runtime`
    pub fn linked(parent: &CancellationToken, runtime: Handle) -> Self {
        Self {
            token: parent.child_token(),
            released: CancellationToken::new(),
            runtime,
            registered: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// The derived token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the derived token without touching the parent
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Register the action to run the first time the derived token is
    /// cancelled. Returns immediately even if the token is already cancelled.
    pub fn register<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DialerError::Disposed);
        }
        if self.registered.swap(true, Ordering::AcqRel) {
            return Err(DialerError::InvalidState(
                "a cancellation action is already registered".to_string(),
            ));
        }

        let token = self.token.clone();
        let released = self.released.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = released.cancelled() => {
                    debug!("Cancellation action released before it fired");
                }
                _ = token.cancelled() => {
                    debug!("Running cancellation action");
                    if let Err(e) = tokio::task::spawn_blocking(action).await {
                        warn!("Cancellation action failed: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    /// Release the registration. An action whose token is already cancelled
    /// still runs; otherwise it is dropped without being invoked. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.token.is_cancelled() {
            self.released.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for CancellationSource {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Creates cancellation sources for new dial sessions
pub trait CancellationSourceFactory: Send + Sync {
    fn create(&self, token: &CancellationToken) -> CancellationSource;
}

/// Factory that runs cancellation actions on a tokio runtime
#[derive(Debug, Clone)]
pub struct RuntimeCancellationSourceFactory {
    runtime: Handle,
}

impl RuntimeCancellationSourceFactory {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime of the calling context
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| DialerError::InvalidState(format!("No tokio runtime: {}", e)))?;
        Ok(Self::new(runtime))
    }
}

impl CancellationSourceFactory for RuntimeCancellationSourceFactory {
    fn create(&self, token: &CancellationToken) -> CancellationSource {
        CancellationSource::linked(token, self.runtime.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn counting_action(count: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let source = CancellationSource::linked(&parent, Handle::current());

        assert!(!source.is_cancelled());
        parent.cancel();
        assert!(source.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_internal_cancel_leaves_parent() {
        let parent = CancellationToken::new();
        let source = CancellationSource::linked(&parent, Handle::current());

        source.cancel();
        assert!(source.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_action_runs_once_off_the_cancelling_thread() {
        let parent = CancellationToken::new();
        let source = CancellationSource::linked(&parent, Handle::current());
        let (tx, rx) = oneshot::channel();

        source
            .register(move || {
                let _ = tx.send(thread::current().id());
            })
            .unwrap();

        parent.cancel();
        source.cancel();

        let action_thread = rx.await.unwrap();
        assert_ne!(action_thread, thread::current().id());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_on_cancelled_token_does_not_run_inline() {
        let parent = CancellationToken::new();
        parent.cancel();
        let source = CancellationSource::linked(&parent, Handle::current());
        let caller = thread::current().id();
        let (tx, rx) = oneshot::channel();

        source
            .register(move || {
                let _ = tx.send(thread::current().id());
            })
            .unwrap();

        assert_ne!(rx.await.unwrap(), caller);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_registration_rejected() {
        let source = CancellationSource::linked(&CancellationToken::new(), Handle::current());
        source.register(|| {}).unwrap();

        let err = source.register(|| {}).unwrap_err();
        assert!(matches!(err, DialerError::InvalidState(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispose_releases_action() {
        let parent = CancellationToken::new();
        let source = CancellationSource::linked(&parent, Handle::current());
        let count = Arc::new(AtomicUsize::new(0));

        source.register(counting_action(&count)).unwrap();
        source.dispose();
        source.dispose();
        parent.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(source.is_disposed());
        assert_eq!(source.register(|| {}), Err(DialerError::Disposed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispose_after_cancel_still_runs_action() {
        let parent = CancellationToken::new();
        let source = CancellationSource::linked(&parent, Handle::current());
        let count = Arc::new(AtomicUsize::new(0));

        source.register(counting_action(&count)).unwrap();
        parent.cancel();
        source.dispose();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_factory_links_tokens() {
        let factory = RuntimeCancellationSourceFactory::current().unwrap();
        let parent = CancellationToken::new();
        let source = factory.create(&parent);

        parent.cancel();
        assert!(source.token().is_cancelled());
    }

    #[test]
    fn test_factory_requires_runtime() {
        assert!(RuntimeCancellationSourceFactory::current().is_err());
    }
}
