//! Integration tests for the CLI in dry-run mode
//!
//! Parses real argument lists and runs them against a seeded in-memory
//! tracker, checking the JSON the binary would print.

use std::collections::BTreeSet;

use bug_agents::cli::{self, Cli};
use chrono::{Duration, Utc};
use clap::Parser;
use triage::{
    title_for, Fingerprint, IssueId, IssueState, ResolutionLabel, TrackedIssue, TriageError,
};

fn seed_file(issues: &[TrackedIssue]) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("Failed to create seed file");
    std::fs::write(file.path(), serde_json::to_string(issues).unwrap()).unwrap();
    file
}

fn closed_pending_merge(id: u64) -> TrackedIssue {
    let fingerprint = Fingerprint::new("6", "lint", "Run ESLint");
    TrackedIssue {
        id: IssueId::from(id),
        title: title_for(&fingerprint),
        state: IssueState::Closed,
        labels: BTreeSet::from([ResolutionLabel::PendingMerge]),
        fingerprint,
        log_range: "L1-L5".into(),
        created_at: Utc::now() - Duration::days(4),
        closed_at: Some(Utc::now() - Duration::days(1)),
    }
}

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("bug-agents").chain(args.iter().copied()))
        .expect("arguments should parse")
}

#[tokio::test]
async fn test_log_retry_from_seed() {
    let seed = seed_file(&[closed_pending_merge(42)]);
    let seed_path = seed.path().to_str().unwrap();

    let output = cli::run(parse(&[
        "--dry-run",
        "--seed",
        seed_path,
        "log",
        "--feature-id",
        "6",
        "--job-name",
        "lint",
        "--step-name",
        "Run ESLint",
        "--log-range",
        "L10-L20",
    ]))
    .await
    .unwrap();

    assert_eq!(output["outcome"], "created");
    assert_eq!(output["detection"]["is_retry"], true);
    assert_eq!(output["detection"]["retry_of_issue_id"], "42");
    assert_eq!(output["detection"]["attempt_count"], 2);
    assert_eq!(output["issue"]["id"], "43");
}

#[tokio::test]
async fn test_log_missing_step_is_validation_error() {
    let err = cli::run(parse(&[
        "--dry-run",
        "log",
        "--feature-id",
        "6",
        "--job-name",
        "lint",
    ]))
    .await
    .unwrap_err();

    assert_eq!(cli::exit_code(&err), 2);
    assert!(err.to_string().contains("step_name"));
}

#[tokio::test]
async fn test_resolve_closed_ticket_is_noop() {
    let seed = seed_file(&[closed_pending_merge(42)]);
    let output = cli::run(parse(&[
        "--dry-run",
        "--seed",
        seed.path().to_str().unwrap(),
        "resolve",
        "--issue-id",
        "42",
        "--run-status",
        "success",
        "--action",
        "mark_as_resolved",
    ]))
    .await
    .unwrap();

    assert_eq!(output["skipped"], "closed");
    assert_eq!(output["transition"], "no_op");
    assert_eq!(output["label_applied"], false);
}

#[tokio::test]
async fn test_resolve_bad_action_names_field() {
    let err = cli::run(parse(&[
        "--dry-run",
        "resolve",
        "--issue-id",
        "42",
        "--run-status",
        "success",
        "--action",
        "merge_it",
    ]))
    .await
    .unwrap_err();

    assert_eq!(cli::exit_code(&err), 2);
    let json = cli::error_json(&err);
    assert_eq!(json["category"], "validation");
    assert!(json["error"].as_str().unwrap().contains("action"));
}

#[tokio::test]
async fn test_check_config_dry_run() {
    let output = cli::run(parse(&["--dry-run", "check-config"])).await.unwrap();
    assert_eq!(output["status"], "ok");
    assert!(output["config"]["github"].get("token").is_none());
}

#[tokio::test]
async fn test_invalid_config_is_configuration_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "tracker_timeout_secs = 0\n").unwrap();

    let err = cli::run(parse(&[
        "--dry-run",
        "--config",
        file.path().to_str().unwrap(),
        "check-config",
    ]))
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TriageError>(),
        Some(TriageError::Configuration(msg)) if msg.contains("tracker_timeout_secs")
    ));
    assert_eq!(cli::exit_code(&err), 1);
    let json = cli::error_json(&err);
    assert_eq!(json["category"], "configuration");
    assert_eq!(json["retriable"], false);
}
