//! Duplicate detection against OPEN tickets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::retry::RetryCheck;
use crate::model::{DetectionResult, FailureEvent, IssueId, TrackedIssue};

/// Which ticket wins when more than one OPEN ticket matches exactly.
///
/// At most one OPEN ticket per fingerprint is the intent, but concurrent
/// loggers can both create one. Downstream automation anchors to whichever
/// ticket is picked here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTieBreak {
    /// Latest `created_at` wins.
    #[default]
    MostRecent,
    /// Earliest `created_at` wins.
    Oldest,
}

impl fmt::Display for DuplicateTieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MostRecent => write!(f, "most_recent"),
            Self::Oldest => write!(f, "oldest"),
        }
    }
}

impl FromStr for DuplicateTieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "most_recent" | "newest" | "latest" => Ok(Self::MostRecent),
            "oldest" | "earliest" => Ok(Self::Oldest),
            other => Err(format!(
                "unknown tie-break '{other}' (expected most_recent or oldest)"
            )),
        }
    }
}

/// Answer of the duplicate detector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub duplicate_issue_id: Option<IssueId>,
    /// Set only when `is_duplicate` is false.
    pub stale_issue_id: Option<IssueId>,
    /// Every OPEN exact match, populated only when there are two or more.
    pub anomaly: Vec<IssueId>,
}

impl DuplicateCheck {
    /// Whether two or more OPEN tickets matched exactly.
    pub fn has_anomaly(&self) -> bool {
        !self.anomaly.is_empty()
    }

    pub(crate) fn into_detection(self, retry: RetryCheck) -> DetectionResult {
        DetectionResult {
            is_duplicate: self.is_duplicate,
            duplicate_issue_id: self.duplicate_issue_id,
            is_retry: retry.is_retry,
            retry_of_issue_id: retry.retry_of_issue_id,
            attempt_count: retry.attempt_count,
            stale_issue_id: self.stale_issue_id,
        }
    }
}

/// Decide whether `event` is already tracked by an OPEN ticket.
///
/// - Exact match on fingerprint and log range → duplicate (tie-break
///   among several matches per `tie_break`).
/// - Otherwise, an OPEN ticket for the same feature with a different
///   fingerprint → stale candidate (most recently created wins).
/// - Tickets that are not OPEN or belong to another feature are ignored.
pub fn detect_duplicate(
    event: &FailureEvent,
    open_tickets: &[TrackedIssue],
    tie_break: DuplicateTieBreak,
) -> DuplicateCheck {
    let fingerprint = event.fingerprint();

    let same_feature: Vec<&TrackedIssue> = open_tickets
        .iter()
        .filter(|t| t.is_open() && t.fingerprint.same_feature(&fingerprint))
        .collect();

    let exact: Vec<&TrackedIssue> = same_feature
        .iter()
        .copied()
        .filter(|t| t.fingerprint == fingerprint && t.log_range == event.log_range)
        .collect();

    if !exact.is_empty() {
        let winner = match tie_break {
            DuplicateTieBreak::MostRecent => exact.iter().max_by_key(|t| t.created_at),
            DuplicateTieBreak::Oldest => exact.iter().min_by_key(|t| t.created_at),
        };
        let anomaly = if exact.len() > 1 {
            exact.iter().map(|t| t.id.clone()).collect()
        } else {
            Vec::new()
        };
        return DuplicateCheck {
            is_duplicate: true,
            duplicate_issue_id: winner.map(|t| t.id.clone()),
            stale_issue_id: None,
            anomaly,
        };
    }

    let stale = same_feature
        .iter()
        .filter(|t| t.fingerprint != fingerprint)
        .max_by_key(|t| t.created_at);

    DuplicateCheck {
        is_duplicate: false,
        duplicate_issue_id: None,
        stale_issue_id: stale.map(|t| t.id.clone()),
        anomaly: Vec::new(),
    }
}
