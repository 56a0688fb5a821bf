//! Stale-Issue Marker.
//!
//! When a feature fails in a different place than its OPEN ticket records,
//! the original failure may be fixed. The ticket gets `fix-pending` and an
//! explanatory comment. Re-marking is harmless: the label add is idempotent
//! and a second comment is just history.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::model::IssueId;
use crate::resolver::{apply_transition, SkipReason, Transition};
use crate::tracker::SharedTracker;

/// What the marker did to the stale candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StaleMark {
    /// Ticket was OPEN; label and comment attempted.
    Marked {
        issue_id: IssueId,
        label_applied: bool,
        comment_posted: bool,
    },
    /// Ticket missing or already closed.
    Skipped {
        issue_id: IssueId,
        reason: SkipReason,
    },
    /// The pre-write re-read failed; nothing was written.
    Unverified { issue_id: IssueId },
}

impl StaleMark {
    /// The stale candidate this mark refers to.
    pub fn issue_id(&self) -> &IssueId {
        match self {
            Self::Marked { issue_id, .. }
            | Self::Skipped { issue_id, .. }
            | Self::Unverified { issue_id } => issue_id,
        }
    }
}

/// Flags OPEN tickets whose failure may already be fixed.
pub struct StaleIssueMarker {
    tracker: SharedTracker,
}

impl StaleIssueMarker {
    /// Marker writing through `tracker`.
    pub fn new(tracker: SharedTracker) -> Self {
        Self { tracker }
    }

    /// Mark `issue_id` as possibly resolved. Never fails: a missing or
    /// closed ticket is skipped, tracker errors are logged.
    pub async fn mark_stale(&self, issue_id: &IssueId) -> StaleMark {
        let current = match self.tracker.get(issue_id).await {
            Ok(current) => current,
            Err(e) => {
                error!(
                    issue_id = %issue_id,
                    error = %e,
                    "Could not re-read stale issue; not marking"
                );
                return StaleMark::Unverified {
                    issue_id: issue_id.clone(),
                };
            }
        };

        let reason = match current {
            None => Some(SkipReason::NotFound),
            Some(ref issue) if !issue.is_open() => Some(SkipReason::Closed),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            warn!(issue_id = %issue_id, ?reason, "Stale issue no longer open; skipping");
            return StaleMark::Skipped {
                issue_id: issue_id.clone(),
                reason,
            };
        }

        let applied =
            apply_transition(&self.tracker, issue_id, Transition::MarkedFixPending).await;
        info!(
            issue_id = %issue_id,
            label_applied = applied.label_applied,
            comment_posted = applied.comment_posted,
            "Marked issue fix-pending after a different failure"
        );

        StaleMark::Marked {
            issue_id: issue_id.clone(),
            label_applied: applied.label_applied,
            comment_posted: applied.comment_posted,
        }
    }
}
