//! Cooperative cancellation tokens.
//!
//! A [`CancelSource`] hands out one [`CancelToken`] per logical operation.
//! Issuing a new token silently invalidates the previous one, so a late
//! response to a superseded call can always be recognised as stale.
//! Tokens are checked before a call is dispatched, raced against the call
//! while it is in flight, and checked again when the response arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Reason recorded when the user aborts an operation.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Reason recorded on a token replaced by a newer one.
pub const SUPERSEDED: &str = "superseded by a newer operation";

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

impl TokenState {
    fn cancel(&self, reason: &str) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.reason.lock() = Some(reason.to_owned());
        self.notify.notify_waiters();
        true
    }
}

/// A cancellation token for one operation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Why the token was cancelled, once it has been.
    pub fn reason(&self) -> Option<String> {
        self.state.reason.lock().clone()
    }

    /// Resolves once the token is cancelled or superseded.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Whether two handles refer to the same issued token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Issues tokens and cancels the current one.
///
/// Cloning shares the source, so a cancel handle can be given to whoever
/// needs to abort the operation (a signal handler, a UI button) while the
/// owner keeps issuing tokens.
#[derive(Debug, Clone, Default)]
pub struct CancelSource {
    current: Arc<Mutex<Option<Arc<TokenState>>>>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token, invalidating the previous one.
    pub fn issue(&self) -> CancelToken {
        let state = Arc::new(TokenState::default());
        let previous = self.current.lock().replace(Arc::clone(&state));
        if let Some(previous) = previous {
            previous.cancel(SUPERSEDED);
        }
        CancelToken { state }
    }

    /// Cancel the current token with `reason`.
    ///
    /// Returns `false` when there is no token or it was already cancelled.
    pub fn cancel(&self, reason: &str) -> bool {
        let current = self.current.lock().clone();
        match current {
            Some(state) => state.cancel(reason),
            None => false,
        }
    }

    /// The most recently issued token, if any.
    pub fn current(&self) -> Option<CancelToken> {
        self.current
            .lock()
            .clone()
            .map(|state| CancelToken { state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_token_lifecycle() {
        let source = CancelSource::new();
        let token = source.issue();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());

        assert!(source.cancel(CANCELLED_BY_USER));
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some(CANCELLED_BY_USER));
    }

    #[test]
    fn issue_supersedes_previous_token() {
        let source = CancelSource::new();
        let old = source.issue();
        let new = source.issue();

        assert!(old.is_cancelled());
        assert_eq!(old.reason().as_deref(), Some(SUPERSEDED));
        assert!(!new.is_cancelled());
    }

    #[test]
    fn cancel_only_affects_current_token() {
        let source = CancelSource::new();
        let old = source.issue();
        let new = source.issue();

        source.cancel("stop");
        assert_eq!(new.reason().as_deref(), Some("stop"));
        // The old token keeps its original reason.
        assert_eq!(old.reason().as_deref(), Some(SUPERSEDED));
    }

    #[test]
    fn cancel_without_token_returns_false() {
        let source = CancelSource::new();
        assert!(!source.cancel(CANCELLED_BY_USER));
    }

    #[test]
    fn second_cancel_keeps_first_reason() {
        let source = CancelSource::new();
        let token = source.issue();
        assert!(source.cancel("first"));
        assert!(!source.cancel("second"));
        assert_eq!(token.reason().as_deref(), Some("first"));
    }

    #[test]
    fn cloned_source_shares_current_token() {
        let source = CancelSource::new();
        let handle = source.clone();
        let token = source.issue();

        handle.cancel(CANCELLED_BY_USER);
        assert!(token.is_cancelled());
        assert!(handle.current().is_some_and(|t| t.same_as(&token)));
    }

    #[tokio::test]
    async fn cancelled_future_wakes_on_cancel() {
        let source = CancelSource::new();
        let token = source.issue();
        let waiter = token.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel(CANCELLED_BY_USER);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_when_already_cancelled() {
        let source = CancelSource::new();
        let token = source.issue();
        source.issue();

        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("superseded token should already be cancelled");
    }
}
