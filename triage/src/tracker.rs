//! Issue tracker seam.
//!
//! The tracker is an external system; triage only queries and mutates it
//! through [`IssueTracker`]. Implementations translate their own label
//! strings and ticket bodies into [`TrackedIssue`] and drop tickets they
//! cannot map.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::labels::ResolutionLabel;
use crate::model::{IssueId, IssueState, TrackedIssue};

/// Error type for tracker operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("issue {0} not found")]
    NotFound(IssueId),

    #[error("tracker unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("malformed tracker data: {0}")]
    Malformed(String),
}

/// Collaborator-side pre-filter. Must over-approximate: it may return
/// unrelated tickets but never hide a true match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub state: IssueState,
    pub title_pattern: String,
}

impl SearchFilter {
    /// OPEN tickets whose title contains `title_pattern`.
    pub fn open(title_pattern: impl Into<String>) -> Self {
        Self {
            state: IssueState::Open,
            title_pattern: title_pattern.into(),
        }
    }

    /// CLOSED tickets whose title contains `title_pattern`.
    pub fn closed(title_pattern: impl Into<String>) -> Self {
        Self {
            state: IssueState::Closed,
            title_pattern: title_pattern.into(),
        }
    }
}

/// A ticket to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<ResolutionLabel>,
}

/// Operations triage needs from an issue tracker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError>;

    /// `Ok(None)` when the ticket does not exist.
    async fn get(&self, id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError>;

    async fn create(&self, issue: &NewIssue) -> Result<TrackedIssue, TrackerError>;

    /// Adding a label the ticket already carries must succeed.
    async fn add_label(&self, id: &IssueId, label: ResolutionLabel) -> Result<(), TrackerError>;

    async fn comment(&self, id: &IssueId, text: &str) -> Result<(), TrackerError>;
}

/// Tracker shared across the engine.
pub type SharedTracker = Arc<dyn IssueTracker>;

/// Wraps a tracker so every call is bounded by a timeout.
pub struct BoundedTracker {
    inner: SharedTracker,
    timeout: Duration,
}

impl BoundedTracker {
    /// Bound every call to `inner` by `timeout`.
    pub fn new(inner: SharedTracker, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Wrap in an [`Arc`] for sharing.
    pub fn shared(self) -> SharedTracker {
        Arc::new(self)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, TrackerError>
    where
        F: std::future::Future<Output = Result<T, TrackerError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation, timeout = ?self.timeout, "Tracker call timed out");
                Err(TrackerError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl IssueTracker for BoundedTracker {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError> {
        self.bounded("search", self.inner.search(filter)).await
    }

    async fn get(&self, id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError> {
        self.bounded("get", self.inner.get(id)).await
    }

    async fn create(&self, issue: &NewIssue) -> Result<TrackedIssue, TrackerError> {
        self.bounded("create", self.inner.create(issue)).await
    }

    async fn add_label(&self, id: &IssueId, label: ResolutionLabel) -> Result<(), TrackerError> {
        self.bounded("add_label", self.inner.add_label(id, label)).await
    }

    async fn comment(&self, id: &IssueId, text: &str) -> Result<(), TrackerError> {
        self.bounded("comment", self.inner.comment(id, text)).await
    }
}
