//! Root lifetime of the relay.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Process-wide cancellation root.
///
/// Each connection derives a child token per connection instance, so
/// triggering the root tears down everything below it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A child lifetime, cancelled with the root.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// The root token itself.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the root lifetime.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the root lifetime is cancelled.
    pub fn wait(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
