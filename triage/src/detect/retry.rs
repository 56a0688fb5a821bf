//! Retry detection against CLOSED tickets.

use crate::model::{FailureEvent, IssueId, TrackedIssue};

/// Answer of the retry detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCheck {
    pub is_retry: bool,
    pub retry_of_issue_id: Option<IssueId>,
    /// `1 + |labeled closed matches|`.
    pub attempt_count: u32,
}

impl RetryCheck {
    /// No prior attempts.
    pub fn first_attempt() -> Self {
        Self {
            is_retry: false,
            retry_of_issue_id: None,
            attempt_count: 1,
        }
    }
}

/// Decide whether `event` recurs after a believed fix.
///
/// A CLOSED ticket counts when its fingerprint equals the event's (log
/// range excluded: the same defect moves around in the log between commits)
/// and it carries `fix-pending` or `pending-merge`. The link goes to the
/// match with the latest `closed_at`.
pub fn detect_retry(event: &FailureEvent, closed_tickets: &[TrackedIssue]) -> RetryCheck {
    let fingerprint = event.fingerprint();

    let matches: Vec<&TrackedIssue> = closed_tickets
        .iter()
        .filter(|t| !t.is_open())
        .filter(|t| t.fingerprint == fingerprint)
        .filter(|t| t.has_resolution_label())
        .collect();

    if matches.is_empty() {
        return RetryCheck::first_attempt();
    }

    let latest = matches
        .iter()
        .max_by_key(|t| (t.closed_at, t.created_at))
        .map(|t| t.id.clone());

    RetryCheck {
        is_retry: true,
        retry_of_issue_id: latest,
        attempt_count: 1 + matches.len() as u32,
    }
}
