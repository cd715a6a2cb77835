//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use tokio::sync::watch;

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Suspended orchestration code awaits [`CancellationToken::cancelled`] next
/// to its own suspension point and unwinds when it resolves.
#[derive(Debug)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    state: watch::Sender<bool>,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(false);
        Self {
            state,
            reason: RwLock::new(None),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns true if this call performed the cancellation.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut slot = self.reason.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.into());
        drop(slot);
        self.state.send_replace(true);
        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so the wait only ends on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
