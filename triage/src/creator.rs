//! Issue Creator.
//!
//! Ticket creation is the durable side effect; the dispatch that follows is
//! best-effort notification and its failure never fails the creation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatch::{DispatchError, DispatchPayload, SharedDispatcher};
use crate::issue_body::{render_body, title_for};
use crate::model::{DetectionResult, FailureEvent, TrackedIssue};
use crate::tracker::{NewIssue, SharedTracker, TrackerError};

/// `event_type` published for a newly created ticket.
pub const DEFAULT_DISPATCH_EVENT: &str = "ci-failure-issue-created";
/// Default bound on a single publish.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether the fix consumer was notified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Published,
    Failed { reason: String },
    /// No dispatcher configured.
    Disabled,
}

/// A created ticket and the dispatch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub issue: TrackedIssue,
    pub dispatch: DispatchStatus,
}

/// Files new tickets and notifies the fix consumer.
pub struct IssueCreator {
    tracker: SharedTracker,
    dispatcher: Option<SharedDispatcher>,
    event_type: String,
    dispatch_timeout: Duration,
}

impl IssueCreator {
    /// Creator with no dispatcher and the default event type and timeout.
    pub fn new(tracker: SharedTracker) -> Self {
        Self {
            tracker,
            dispatcher: None,
            event_type: DEFAULT_DISPATCH_EVENT.to_string(),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Notify `dispatcher` after each creation.
    pub fn with_dispatcher(mut self, dispatcher: SharedDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Override the published `event_type`.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Bound on a single publish.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Create an OPEN ticket for `event` with the retry metadata embedded,
    /// then notify the fix consumer.
    pub async fn create_issue(
        &self,
        event: &FailureEvent,
        detection: &DetectionResult,
    ) -> Result<CreatedIssue, TrackerError> {
        let fingerprint = event.fingerprint();
        let new_issue = NewIssue {
            title: title_for(&fingerprint),
            body: render_body(event, detection),
            labels: Vec::new(),
        };

        let issue = self.tracker.create(&new_issue).await?;
        info!(
            issue_id = %issue.id,
            fingerprint = %fingerprint,
            is_retry = detection.is_retry,
            attempt_count = detection.attempt_count,
            "Created issue for CI failure"
        );

        let dispatch = self.dispatch(&issue, event, detection).await;
        Ok(CreatedIssue { issue, dispatch })
    }

    async fn dispatch(
        &self,
        issue: &TrackedIssue,
        event: &FailureEvent,
        detection: &DetectionResult,
    ) -> DispatchStatus {
        let Some(dispatcher) = &self.dispatcher else {
            return DispatchStatus::Disabled;
        };

        let payload = DispatchPayload::new(issue.id.clone(), &issue.title, event, detection);
        let publish = dispatcher.publish(&self.event_type, &payload);
        let result = tokio::time::timeout(self.dispatch_timeout, publish)
            .await
            .unwrap_or(Err(DispatchError::Timeout(self.dispatch_timeout)));
        match result {
            Ok(()) => DispatchStatus::Published,
            Err(e) => {
                warn!(
                    issue_id = %issue.id,
                    error = %e,
                    "Dispatch failed; issue remains created"
                );
                DispatchStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
