//! Resolver: label/comment transitions after a fix attempt.
//!
//! ```text
//! OPEN ── mark_previous_as_pending ───────────────▶ OPEN + fix-pending   (+ comment)
//! OPEN ── mark_as_resolved, run_status=success ──▶ OPEN + pending-merge (+ comment)
//! OPEN ── mark_as_resolved, run_status=failure ──▶ OPEN, labels as-is   (+ comment)
//! ```
//!
//! Closing a ticket happens outside this crate. A request against a ticket
//! that is missing or already closed is a no-op, not an error. Labels are
//! only ever added, never removed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{TriageError, TriageResult, ValidationError};
use crate::labels::ResolutionLabel;
use crate::model::IssueId;
use crate::tracker::{SharedTracker, TrackerError};

pub(crate) const STALE_COMMENT: &str = "A different CI failure was detected for this feature. \
     The failure tracked here may already be resolved; marking as `fix-pending`.";
const FIX_SUCCEEDED_COMMENT: &str = "The automated fix attempt succeeded. \
     Marking as `pending-merge`; the fix is pending review and merge.";
const FIX_FAILED_COMMENT: &str = "The automated fix attempt failed. \
     Manual investigation is required.";

/// Outcome of the fix-attempt run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
}

impl FromStr for RunStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(ValidationError::new(
                "run_status",
                format!("'{s}' is not one of success, failure"),
            )),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// What the fix workflow asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    MarkPreviousAsPending,
    MarkAsResolved,
}

impl FromStr for ResolutionAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "mark_previous_as_pending" => Ok(Self::MarkPreviousAsPending),
            "mark_as_resolved" => Ok(Self::MarkAsResolved),
            _ => Err(ValidationError::new(
                "action",
                format!("'{s}' is not one of mark_previous_as_pending, mark_as_resolved"),
            )),
        }
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkPreviousAsPending => write!(f, "mark_previous_as_pending"),
            Self::MarkAsResolved => write!(f, "mark_as_resolved"),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('-', "_")
}

/// Untyped request as received from a workflow or CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResolutionRequest {
    pub issue_id: String,
    pub run_status: String,
    pub action: String,
}

/// Validated input to [`Resolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub issue_id: IssueId,
    pub run_status: RunStatus,
    pub action: ResolutionAction,
}

impl TryFrom<&RawResolutionRequest> for ResolutionRequest {
    type Error = ValidationError;

    fn try_from(raw: &RawResolutionRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            issue_id: IssueId::parse(&raw.issue_id)?,
            run_status: raw.run_status.parse()?,
            action: raw.action.parse()?,
        })
    }
}

/// The edge taken in the ticket state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    MarkedFixPending,
    MarkedPendingMerge,
    FixFailed,
    /// Ticket missing or closed; nothing written.
    NoOp,
}

impl Transition {
    /// `mark_previous_as_pending` ignores the run status.
    pub fn select(action: ResolutionAction, run_status: RunStatus) -> Self {
        match (action, run_status) {
            (ResolutionAction::MarkPreviousAsPending, _) => Self::MarkedFixPending,
            (ResolutionAction::MarkAsResolved, RunStatus::Success) => Self::MarkedPendingMerge,
            (ResolutionAction::MarkAsResolved, RunStatus::Failure) => Self::FixFailed,
        }
    }

    /// Label added by this transition, if any.
    pub fn label(self) -> Option<ResolutionLabel> {
        match self {
            Self::MarkedFixPending => Some(ResolutionLabel::FixPending),
            Self::MarkedPendingMerge => Some(ResolutionLabel::PendingMerge),
            Self::FixFailed | Self::NoOp => None,
        }
    }

    /// Comment appended by this transition, if any.
    pub fn comment(self) -> Option<&'static str> {
        match self {
            Self::MarkedFixPending => Some(STALE_COMMENT),
            Self::MarkedPendingMerge => Some(FIX_SUCCEEDED_COMMENT),
            Self::FixFailed => Some(FIX_FAILED_COMMENT),
            Self::NoOp => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkedFixPending => write!(f, "marked_fix_pending"),
            Self::MarkedPendingMerge => write!(f, "marked_pending_merge"),
            Self::FixFailed => write!(f, "fix_failed"),
            Self::NoOp => write!(f, "no_op"),
        }
    }
}

/// Why a request completed without touching the ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    Closed,
}

/// What `resolve` did. Callers that only need "the intent was recorded"
/// can ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub issue_id: IssueId,
    pub transition: Transition,
    pub label_applied: bool,
    pub comment_posted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl ResolutionReport {
    fn skipped(issue_id: IssueId, reason: SkipReason) -> Self {
        Self {
            issue_id,
            transition: Transition::NoOp,
            label_applied: false,
            comment_posted: false,
            skipped: Some(reason),
        }
    }
}

/// Result of applying one transition's writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AppliedWrites {
    pub label_applied: bool,
    pub comment_posted: bool,
}

/// Apply the label and the comment of `transition`. Both are attempted even
/// if one fails; failures are logged, never rolled back.
pub(crate) async fn apply_transition(
    tracker: &SharedTracker,
    issue_id: &IssueId,
    transition: Transition,
) -> AppliedWrites {
    let mut applied = AppliedWrites::default();

    if let Some(label) = transition.label() {
        match tracker.add_label(issue_id, label).await {
            Ok(()) => applied.label_applied = true,
            Err(e) => log_write_failure(issue_id, "add_label", &e),
        }
    }

    if let Some(text) = transition.comment() {
        match tracker.comment(issue_id, text).await {
            Ok(()) => applied.comment_posted = true,
            Err(e) => log_write_failure(issue_id, "comment", &e),
        }
    }

    applied
}

fn log_write_failure(issue_id: &IssueId, operation: &str, err: &TrackerError) {
    match err {
        TrackerError::NotFound(_) => {
            warn!(issue_id = %issue_id, operation, "Issue vanished before write; skipping")
        }
        _ => error!(issue_id = %issue_id, operation, error = %err, "Tracker write failed"),
    }
}

/// Drives resolution transitions against the tracker.
pub struct Resolver {
    tracker: SharedTracker,
}

impl Resolver {
    /// Resolver writing through `tracker`.
    pub fn new(tracker: SharedTracker) -> Self {
        Self { tracker }
    }

    /// Validate an untyped request, then resolve it. Invalid input is
    /// rejected before any tracker call.
    pub async fn resolve_raw(&self, raw: &RawResolutionRequest) -> TriageResult<ResolutionReport> {
        let request = ResolutionRequest::try_from(raw)?;
        self.resolve(&request).await
    }

    /// Re-read the ticket, then apply the transition selected by the
    /// action and run status. A missing or closed ticket is a no-op.
    pub async fn resolve(&self, request: &ResolutionRequest) -> TriageResult<ResolutionReport> {
        let issue_id = &request.issue_id;

        let current = self
            .tracker
            .get(issue_id)
            .await
            .map_err(|e| TriageError::unavailable("get_issue", e))?;

        let issue = match current {
            None => {
                warn!(
                    issue_id = %issue_id,
                    action = %request.action,
                    "Issue not found; nothing to resolve"
                );
                return Ok(ResolutionReport::skipped(issue_id.clone(), SkipReason::NotFound));
            }
            Some(issue) if !issue.is_open() => {
                warn!(
                    issue_id = %issue_id,
                    action = %request.action,
                    "Issue already closed; nothing to resolve"
                );
                return Ok(ResolutionReport::skipped(issue_id.clone(), SkipReason::Closed));
            }
            Some(issue) => issue,
        };

        let transition = Transition::select(request.action, request.run_status);
        let applied = apply_transition(&self.tracker, &issue.id, transition).await;

        info!(
            issue_id = %issue.id,
            action = %request.action,
            run_status = %request.run_status,
            transition = %transition,
            label_applied = applied.label_applied,
            comment_posted = applied.comment_posted,
            "Resolution recorded"
        );

        Ok(ResolutionReport {
            issue_id: issue.id,
            transition,
            label_applied: applied.label_applied,
            comment_posted: applied.comment_posted,
            skipped: None,
        })
    }
}
