//! Ticket title and body encoding.
//!
//! The body carries a human-readable summary followed by a hidden metadata
//! block, `<!-- triage-metadata {json} -->`, from which the fingerprint and
//! retry history are recovered on later runs.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{DetectionResult, FailureEvent, Fingerprint, IssueId};

/// Bump when adding/removing/renaming metadata fields.
pub const METADATA_SCHEMA_VERSION: u8 = 1;

const METADATA_MARKER: &str = "triage-metadata";

static METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*triage-metadata\s+(\{.*?\})\s*-->")
        .expect("METADATA_RE regex should compile")
});

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^CI failure \[feature-([^\]]+)\] (.+?) / (.+)$")
        .expect("TITLE_RE regex should compile")
});

/// Machine-readable part of a ticket body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u8,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub log_range: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub is_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of_issue_id: Option<IssueId>,
    #[serde(default = "default_attempt_count")]
    pub attempt_count: u32,
}

fn default_schema_version() -> u8 {
    METADATA_SCHEMA_VERSION
}

fn default_attempt_count() -> u32 {
    1
}

impl TicketMetadata {
    /// Metadata recorded on a ticket created for `event`.
    pub fn from_event(event: &FailureEvent, detection: &DetectionResult) -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            fingerprint: event.fingerprint(),
            log_range: event.log_range.clone(),
            branch_name: event.branch_name.clone(),
            run_id: event.run_id.clone(),
            pr_url: event.pr_url.clone(),
            is_retry: detection.is_retry,
            retry_of_issue_id: detection.retry_of_issue_id.clone(),
            attempt_count: detection.attempt_count.max(1),
        }
    }
}

/// Search pattern used to narrow tracker queries to one feature.
///
/// Derived from the feature id only: the branch is not part of the
/// fingerprint, so filtering on it could hide a true match.
pub fn title_pattern(feature_id: &str) -> String {
    format!("[feature-{}]", feature_id.trim())
}

/// Ticket title for a fingerprint; always contains [`title_pattern`].
pub fn title_for(fingerprint: &Fingerprint) -> String {
    format!(
        "CI failure {} {} / {}",
        title_pattern(&fingerprint.feature_id),
        fingerprint.job_name,
        fingerprint.step_name
    )
}

/// Markdown body followed by the hidden metadata block.
pub fn render_body(event: &FailureEvent, detection: &DetectionResult) -> String {
    let metadata = TicketMetadata::from_event(event, detection);
    let mut body = String::new();

    let _ = writeln!(body, "## CI failure\n");
    let _ = writeln!(body, "- **Feature:** {}", metadata.fingerprint.feature_id);
    let _ = writeln!(body, "- **Job:** {}", metadata.fingerprint.job_name);
    let _ = writeln!(body, "- **Step:** {}", metadata.fingerprint.step_name);
    if !event.log_range.is_empty() {
        let _ = writeln!(body, "- **Log range:** {}", event.log_range);
    }
    if !event.branch_name.is_empty() {
        let _ = writeln!(body, "- **Branch:** {}", event.branch_name);
    }
    if !event.run_id.is_empty() {
        let _ = writeln!(body, "- **Run:** {}", event.run_id);
    }
    if let Some(pr) = &event.pr_url {
        let _ = writeln!(body, "- **Pull request:** {pr}");
    }

    let _ = writeln!(body, "\n### Retry status\n");
    match &detection.retry_of_issue_id {
        Some(previous) if detection.is_retry => {
            let _ = writeln!(
                body,
                "This failure was previously marked as resolved in #{previous} and has \
                 recurred. Attempt {}.",
                metadata.attempt_count
            );
        }
        _ => {
            let _ = writeln!(body, "First recorded occurrence (attempt 1).");
        }
    }

    // Serializing a struct of strings and integers cannot fail.
    let json = serde_json::to_string(&metadata).unwrap_or_default();
    let _ = write!(body, "\n<!-- {METADATA_MARKER} {json} -->\n");
    body
}

/// Recover the metadata block from a ticket body.
pub fn parse_metadata(body: &str) -> Option<TicketMetadata> {
    let captures = METADATA_RE.captures(body)?;
    serde_json::from_str(captures.get(1)?.as_str()).ok()
}

/// Recover a fingerprint from a title produced by [`title_for`]. Lossy when
/// the job name itself contains `" / "`; prefer the metadata block.
pub fn parse_title(title: &str) -> Option<Fingerprint> {
    let captures = TITLE_RE.captures(title.trim())?;
    Some(Fingerprint::new(&captures[1], &captures[2], &captures[3]))
}
