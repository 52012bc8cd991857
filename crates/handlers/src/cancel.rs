//! Cooperative cancellation token.
//!
//! A `CancelToken` is created per execution and passed to every handler
//! invocation. Handlers must poll [`CancelToken::is_cancelled`] or await
//! [`CancelToken::cancelled`] at their suspension points; the engine never
//! force-terminates a handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cheap-to-clone cancellation signal shared between an execution and its
/// in-flight handlers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token and wake every waiter.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn cancel(&self) {
        let was_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !was_cancelled {
            self.notify.notify_waiters();
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    ///
    /// Returns immediately if the token is already tripped.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the flag so a cancel()
            // racing this call cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_sets_the_flag() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_tripped() {
        let token = CancelToken::new();
        token.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), token.cancelled()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn waiter_wakes_when_another_clone_cancels() {
        let token = CancelToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(1), token.cancelled()).await;
        assert!(result.is_ok());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn repeated_cancel_is_harmless() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
