//! Core data model: failure events, fingerprints, tracked tickets.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::labels::ResolutionLabel;

const MAX_ISSUE_ID_LEN: usize = 64;

/// Opaque ticket identifier.
///
/// Accepts ASCII alphanumerics, `-` and `_`, with an optional leading `#`
/// (so `#42` and `42` name the same ticket).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssueId(String);

impl IssueId {
    /// Validate and normalize a raw identifier, stripping a leading `#`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let id = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if id.is_empty() {
            return Err(ValidationError::new("issue_id", "must not be empty"));
        }
        if id.len() > MAX_ISSUE_ID_LEN {
            return Err(ValidationError::new(
                "issue_id",
                format!("longer than {MAX_ISSUE_ID_LEN} characters"),
            ));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ValidationError::new(
                "issue_id",
                format!("unexpected character '{bad}' in '{raw}'"),
            ));
        }
        Ok(Self(id.to_string()))
    }

    /// The normalized identifier, without `#`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IssueId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IssueId> for String {
    fn from(id: IssueId) -> Self {
        id.0
    }
}

impl From<u64> for IssueId {
    fn from(number: u64) -> Self {
        Self(number.to_string())
    }
}

/// Identity of "the same underlying failure". The log range is deliberately
/// not part of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub feature_id: String,
    pub job_name: String,
    pub step_name: String,
}

impl Fingerprint {
    /// Build a fingerprint from its three components, trimming surrounding
    /// whitespace so `" 6"` and `"6"` name the same feature.
    pub fn new(feature_id: &str, job_name: &str, step_name: &str) -> Self {
        Self {
            feature_id: feature_id.trim().to_string(),
            job_name: job_name.trim().to_string(),
            step_name: step_name.trim().to_string(),
        }
    }

    /// Stable digest of the three components, usable as an idempotency key.
    pub fn key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [&self.feature_id, &self.job_name, &self.step_name] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Whether both fingerprints belong to the same feature.
    pub fn same_feature(&self, other: &Fingerprint) -> bool {
        self.feature_id == other.feature_id
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.feature_id, self.job_name, self.step_name)
    }
}

/// One CI failure signal. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub feature_id: String,
    pub job_name: String,
    pub step_name: String,
    /// Log excerpt span. Only compared for OPEN-ticket duplicate matching.
    #[serde(default)]
    pub log_range: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl FailureEvent {
    /// Normalized identity of this failure.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.feature_id, &self.job_name, &self.step_name)
    }

    /// Reject events whose fingerprint would have an empty component.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("feature_id", &self.feature_id),
            ("job_name", &self.job_name),
            ("step_name", &self.step_name),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::new(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Ticket lifecycle state as triage sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A ticket as observed in the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub id: IssueId,
    pub title: String,
    pub state: IssueState,
    pub labels: BTreeSet<ResolutionLabel>,
    pub fingerprint: Fingerprint,
    pub log_range: String,
    pub created_at: DateTime<Utc>,
    /// `None` while the ticket is open.
    pub closed_at: Option<DateTime<Utc>>,
}

impl TrackedIssue {
    /// Whether the ticket is currently OPEN.
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }

    /// Whether the ticket was ever believed resolved.
    pub fn has_resolution_label(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Classification result for one failure event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_duplicate: bool,
    pub duplicate_issue_id: Option<IssueId>,
    pub is_retry: bool,
    pub retry_of_issue_id: Option<IssueId>,
    /// Always at least 1.
    pub attempt_count: u32,
    /// Open ticket to mark `fix-pending` as a side effect.
    pub stale_issue_id: Option<IssueId>,
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self {
            is_duplicate: false,
            duplicate_issue_id: None,
            is_retry: false,
            retry_of_issue_id: None,
            attempt_count: 1,
            stale_issue_id: None,
        }
    }
}
