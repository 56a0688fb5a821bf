//! Optional idempotency claims keyed by fingerprint.
//!
//! The tracker offers no lock, so two loggers racing on the same fingerprint
//! can both create a ticket. A [`ClaimStore`] with atomic claim semantics
//! closes that window: only the holder of the key may create.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Atomic claim over a string key.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically claim `key`. Returns `false` if someone else holds it.
    async fn try_claim(&self, key: &str) -> bool;

    async fn release(&self, key: &str);
}

/// Claim store shared across loggers.
pub type SharedClaims = Arc<dyn ClaimStore>;

/// Process-local claim store.
#[derive(Default)]
pub struct InMemoryClaims {
    held: Mutex<HashSet<String>>,
}

impl InMemoryClaims {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an [`Arc`] for sharing.
    pub fn shared(self) -> SharedClaims {
        Arc::new(self)
    }

    /// Whether `key` is currently claimed.
    pub async fn is_held(&self, key: &str) -> bool {
        self.held.lock().await.contains(key)
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaims {
    async fn try_claim(&self, key: &str) -> bool {
        self.held.lock().await.insert(key.to_string())
    }

    async fn release(&self, key: &str) {
        self.held.lock().await.remove(key);
    }
}
