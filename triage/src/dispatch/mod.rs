//! Fix-attempt dispatch.
//!
//! When a new ticket is created, a one-way message is published so a
//! downstream automated-fix consumer can pick it up. Delivery is
//! fire-and-forget from this crate's point of view: whether or when the
//! consumer runs is not observable here.
//!
//! - **Types** (`types.rs`): the payload and the envelope.
//! - **Event bus** (`bus.rs`): in-process broadcast implementation.
//!
//! Out-of-process publishers (e.g. a repository-dispatch webhook) implement
//! [`Dispatcher`] in the agent crate.

pub mod bus;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use bus::{EventBus, SharedEventBus};
pub use types::{DispatchEvent, DispatchMetadata, DispatchPayload};

/// Error type for dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to send event: {0}")]
    SendFailed(String),

    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Dispatch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One-way publisher to the fix-attempt consumer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn publish(
        &self,
        event_type: &str,
        payload: &DispatchPayload,
    ) -> Result<(), DispatchError>;
}

/// Dispatcher shared across the engine.
pub type SharedDispatcher = Arc<dyn Dispatcher>;
