//! Logging setup and outcome telemetry.
//!
//! Logs go to stderr so stdout carries only the command's JSON result.
//! When a telemetry path is configured, every classification or resolution
//! appends one line to a JSONL file for later analysis.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use triage::{FailureEvent, FailureOutcome, ResolutionReport, Transition, TriageError};

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// What a telemetry line records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    Duplicate,
    Suppressed,
    Resolved,
    ResolveSkipped,
    Failed,
}

/// One JSONL line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub timestamp: String,
    pub kind: OutcomeKind,
    /// The ticket created or acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// Duplicate or retry anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

impl OutcomeRecord {
    fn new(kind: OutcomeKind, elapsed: Duration) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            issue_id: None,
            related_issue_id: None,
            stale_issue_id: None,
            fingerprint: None,
            attempt_count: None,
            detail: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Record for a classified failure event.
    pub fn from_failure(event: &FailureEvent, outcome: &FailureOutcome, elapsed: Duration) -> Self {
        let detection = outcome.detection();
        let kind = match outcome {
            FailureOutcome::Created { .. } => OutcomeKind::Created,
            FailureOutcome::Duplicate { .. } => OutcomeKind::Duplicate,
            FailureOutcome::Suppressed { .. } => OutcomeKind::Suppressed,
        };
        let related = detection
            .duplicate_issue_id
            .as_ref()
            .or(detection.retry_of_issue_id.as_ref());
        let detail = match outcome {
            FailureOutcome::Duplicate { raced: true, .. } => Some("raced".to_string()),
            FailureOutcome::Created { dispatch, .. } => {
                serde_json::to_value(dispatch)
                    .ok()
                    .and_then(|v| v["status"].as_str().map(|s| format!("dispatch_{s}")))
            }
            _ => None,
        };
        Self {
            issue_id: outcome.created_issue_id().map(ToString::to_string),
            related_issue_id: related.map(ToString::to_string),
            stale_issue_id: outcome
                .stale_mark()
                .map(|mark| mark.issue_id())
                .or(detection.stale_issue_id.as_ref())
                .map(ToString::to_string),
            fingerprint: Some(event.fingerprint().to_string()),
            attempt_count: Some(detection.attempt_count),
            detail,
            ..Self::new(kind, elapsed)
        }
    }

    /// Record for a resolution request.
    pub fn from_resolution(report: &ResolutionReport, elapsed: Duration) -> Self {
        let (kind, detail) = match report.transition {
            Transition::NoOp => (
                OutcomeKind::ResolveSkipped,
                report
                    .skipped
                    .and_then(|reason| serde_json::to_value(reason).ok())
                    .and_then(|v| v.as_str().map(String::from)),
            ),
            transition => (OutcomeKind::Resolved, Some(transition.to_string())),
        };
        Self {
            issue_id: Some(report.issue_id.to_string()),
            detail,
            ..Self::new(kind, elapsed)
        }
    }

    /// Record for a command that failed.
    pub fn from_error(err: &TriageError, elapsed: Duration) -> Self {
        Self {
            detail: Some(err.to_string()),
            ..Self::new(OutcomeKind::Failed, elapsed)
        }
    }
}

/// Append one record to the JSONL file at `path`.
///
/// Failures are logged and swallowed; telemetry never fails a command.
pub fn append_outcome(record: &OutcomeRecord, path: &Path) {
    let json = match serde_json::to_string(record) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize outcome record: {e}");
            return;
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), "Failed to create telemetry directory: {e}");
            return;
        }
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("Failed to append outcome telemetry: {e}");
            } else {
                info!(path = %path.display(), kind = ?record.kind, "Appended outcome telemetry");
            }
        }
        Err(e) => warn!("Failed to open telemetry file: {e}"),
    }
}
