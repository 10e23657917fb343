//! Cooperative cancellation shared between a caller and a running tool.
//!
//! [`AbortSignal`] wraps a [`CancellationToken`] behind a lock so the signal
//! can be reset with [`AbortSignal::clear`] and reused between unrelated
//! calls. Within one call the signal only ever moves from unset to set.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared abort flag. Clones observe and control the same state.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    token: Arc<Mutex<CancellationToken>>,
}

impl AbortSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Calling this more than once has no further effect.
    pub fn abort(&self) {
        self.token.lock().cancel();
    }

    /// Non-blocking check.
    pub fn is_set(&self) -> bool {
        self.token.lock().is_cancelled()
    }

    /// Reset a set signal so it can be handed to a new call.
    ///
    /// Waiters from the previous call have already been woken; they are not
    /// affected. Clearing an unset signal is a no-op.
    pub fn clear(&self) {
        let mut token = self.token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Resolve once the signal is set. Resolves immediately if it already is.
    pub async fn aborted(&self) {
        let token = self.token.lock().clone();
        token.cancelled_owned().await;
    }
}
