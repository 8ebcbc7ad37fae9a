use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Cooperative cancellation handle shared between `stop()` and the read loop.
/// Cancelling only flips the token and wakes waiters; the loop decides when to exit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancellationToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once `cancel` has been called (immediately if it already was).
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Identity, not state: clones of one token compare equal.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
