use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancels a prepared batch that has not started yet.
///
/// Once the batch's journal entry exists the request is ignored: the batch
/// runs to commit or rollback so the filesystem never stops halfway.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Has no effect once the batch has started.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`Self::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
