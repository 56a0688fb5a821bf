//! Integration tests for the failure logger
//!
//! Drives full log_failure runs against the in-memory tracker and a few
//! misbehaving trackers, checking what ends up in the ticket collection.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use triage::{
    classify, parse_metadata, title_for, DispatchStatus, DuplicateTieBreak, ErrorCategory,
    EventBus, FailureEvent, FailureLogger, FailureOutcome, Fingerprint, InMemoryClaims,
    InMemoryTracker, IssueId, IssueState, IssueTracker, LoggerSettings, NewIssue,
    ResolutionLabel, SearchFilter, StaleMark, TrackedIssue, TrackerError, TriageError,
};

fn lint_event() -> FailureEvent {
    FailureEvent {
        feature_id: "6".into(),
        job_name: "lint".into(),
        step_name: "Run ESLint".into(),
        log_range: "L120-L164".into(),
        branch_name: "feature/6-login".into(),
        run_id: "9001".into(),
        pr_url: Some("https://example.invalid/pull/77".into()),
    }
}

fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(days)
}

fn tracked(
    id: u64,
    fingerprint: Fingerprint,
    log_range: &str,
    labels: &[ResolutionLabel],
    created: DateTime<Utc>,
    closed: Option<DateTime<Utc>>,
) -> TrackedIssue {
    TrackedIssue {
        id: IssueId::from(id),
        title: title_for(&fingerprint),
        state: if closed.is_some() {
            IssueState::Closed
        } else {
            IssueState::Open
        },
        labels: labels.iter().copied().collect::<BTreeSet<_>>(),
        fingerprint,
        log_range: log_range.into(),
        created_at: created,
        closed_at: closed,
    }
}

fn closed_lint(id: u64, labels: &[ResolutionLabel], closed_days_ago: i64) -> TrackedIssue {
    tracked(
        id,
        lint_event().fingerprint(),
        "L1-L2",
        labels,
        days_ago(closed_days_ago + 5),
        Some(days_ago(closed_days_ago)),
    )
}

fn logger(tracker: Arc<InMemoryTracker>) -> FailureLogger {
    FailureLogger::new(tracker, LoggerSettings::default())
}

fn created(outcome: FailureOutcome) -> TrackedIssue {
    match outcome {
        FailureOutcome::Created { issue, .. } => issue,
        other => panic!("expected Created, got {other:?}"),
    }
}

/// Scenario A: no tickets at all
#[tokio::test]
async fn test_first_failure_creates_issue() {
    let tracker = Arc::new(InMemoryTracker::new());
    let outcome = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();

    let detection = outcome.detection().clone();
    assert!(!detection.is_retry);
    assert_eq!(detection.attempt_count, 1);
    assert_eq!(detection.stale_issue_id, None);

    let issue = created(outcome);
    assert_eq!(issue.state, IssueState::Open);
    assert_eq!(issue.fingerprint, lint_event().fingerprint());
    assert_eq!(issue.log_range, "L120-L164");
    assert!(issue.labels.is_empty());

    let meta = parse_metadata(&tracker.body(&issue.id).await.unwrap()).unwrap();
    assert!(!meta.is_retry);
    assert_eq!(meta.attempt_count, 1);
    assert_eq!(meta.branch_name, "feature/6-login");
}

/// Scenario B: one CLOSED pending-merge ticket
#[tokio::test]
async fn test_retry_of_pending_merge_ticket() {
    let tracker = Arc::new(InMemoryTracker::new());
    tracker
        .insert(closed_lint(42, &[ResolutionLabel::PendingMerge], 1))
        .await;

    let outcome = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();
    let detection = outcome.detection().clone();
    assert!(detection.is_retry);
    assert_eq!(detection.retry_of_issue_id, Some(IssueId::from(42)));
    assert_eq!(detection.attempt_count, 2);

    let issue = created(outcome);
    assert_eq!(issue.id, IssueId::from(43));
    let meta = parse_metadata(&tracker.body(&issue.id).await.unwrap()).unwrap();
    assert_eq!(meta.retry_of_issue_id, Some(IssueId::from(42)));
    assert_eq!(meta.attempt_count, 2);
}

/// Scenario C: links to the most recently closed of two labeled tickets
#[tokio::test]
async fn test_retry_links_latest_closed() {
    let tracker = Arc::new(InMemoryTracker::new());
    tracker
        .insert(closed_lint(43, &[ResolutionLabel::FixPending], 1))
        .await;
    tracker
        .insert(closed_lint(42, &[ResolutionLabel::PendingMerge], 4))
        .await;

    let outcome = logger(tracker).log_failure(&lint_event()).await.unwrap();
    let detection = outcome.detection();
    assert_eq!(detection.retry_of_issue_id, Some(IssueId::from(43)));
    assert_eq!(detection.attempt_count, 3);
}

/// Scenario D: a closed match without a resolution label does not count
#[tokio::test]
async fn test_unlabeled_closed_ticket_excluded() {
    let tracker = Arc::new(InMemoryTracker::new());
    tracker.insert(closed_lint(42, &[], 1)).await;

    let outcome = logger(tracker).log_failure(&lint_event()).await.unwrap();
    let detection = outcome.detection();
    assert!(!detection.is_retry);
    assert_eq!(detection.retry_of_issue_id, None);
    assert_eq!(detection.attempt_count, 1);
}

#[tokio::test]
async fn test_open_exact_match_is_duplicate_with_no_writes() {
    let tracker = Arc::new(InMemoryTracker::new());
    tracker
        .insert(tracked(
            12,
            lint_event().fingerprint(),
            "L120-L164",
            &[],
            days_ago(1),
            None,
        ))
        .await;

    let outcome = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();
    assert!(matches!(outcome, FailureOutcome::Duplicate { raced: false, .. }));
    assert_eq!(
        outcome.detection().duplicate_issue_id,
        Some(IssueId::from(12))
    );
    assert_eq!(tracker.calls().await.writes(), 0);
    assert_eq!(tracker.len().await, 1);
}

#[tokio::test]
async fn test_same_fingerprint_new_log_range_is_not_duplicate() {
    let tracker = Arc::new(InMemoryTracker::new());
    tracker
        .insert(tracked(
            12,
            lint_event().fingerprint(),
            "L1-L9",
            &[],
            days_ago(1),
            None,
        ))
        .await;

    let outcome = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();
    assert!(outcome.created_issue_id().is_some());
    assert_eq!(tracker.len().await, 2);
}

#[tokio::test]
async fn test_different_step_marks_sibling_fix_pending() {
    let tracker = Arc::new(InMemoryTracker::new());
    let sibling = Fingerprint::new("6", "test", "cargo test");
    tracker
        .insert(tracked(30, sibling, "L5", &[], days_ago(2), None))
        .await;

    let outcome = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();
    assert_eq!(outcome.detection().stale_issue_id, Some(IssueId::from(30)));
    let FailureOutcome::Created { stale, .. } = &outcome else {
        panic!("expected Created");
    };
    assert!(matches!(
        stale,
        Some(StaleMark::Marked {
            label_applied: true,
            comment_posted: true,
            ..
        })
    ));

    let sibling = tracker.issue(&IssueId::from(30)).await.unwrap();
    assert_eq!(
        sibling.labels,
        BTreeSet::from([ResolutionLabel::FixPending])
    );
    assert_eq!(sibling.state, IssueState::Open);
    assert_eq!(tracker.len().await, 2);
}

#[tokio::test]
async fn test_other_feature_tickets_are_ignored() {
    let tracker = Arc::new(InMemoryTracker::new());
    tracker
        .insert(tracked(
            3,
            Fingerprint::new("60", "lint", "Run ESLint"),
            "L120-L164",
            &[],
            days_ago(1),
            None,
        ))
        .await;
    tracker
        .insert(tracked(
            4,
            Fingerprint::new("60", "lint", "Run ESLint"),
            "L1",
            &[ResolutionLabel::PendingMerge],
            days_ago(9),
            Some(days_ago(2)),
        ))
        .await;

    let outcome = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();
    let detection = outcome.detection();
    assert!(!detection.is_duplicate);
    assert!(!detection.is_retry);
    assert_eq!(detection.stale_issue_id, None);
    assert_eq!(tracker.calls().await.add_label, 0);
}

#[tokio::test]
async fn test_second_identical_event_is_duplicate_of_first() {
    let tracker = Arc::new(InMemoryTracker::new());
    let logger = logger(tracker.clone());

    let first = logger.log_failure(&lint_event()).await.unwrap();
    let first_id = first.created_issue_id().cloned().unwrap();

    let second = logger.log_failure(&lint_event()).await.unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.detection().duplicate_issue_id, Some(first_id));
    assert_eq!(tracker.len().await, 1);
}

#[tokio::test]
async fn test_tie_break_oldest_picks_earliest_duplicate() {
    let tracker = Arc::new(InMemoryTracker::new());
    for (id, age) in [(7, 3), (8, 1)] {
        tracker
            .insert(tracked(
                id,
                lint_event().fingerprint(),
                "L120-L164",
                &[],
                days_ago(age),
                None,
            ))
            .await;
    }

    let newest = logger(tracker.clone()).log_failure(&lint_event()).await.unwrap();
    assert_eq!(newest.detection().duplicate_issue_id, Some(IssueId::from(8)));

    let settings = LoggerSettings {
        tie_break: DuplicateTieBreak::Oldest,
        ..LoggerSettings::default()
    };
    let oldest = FailureLogger::new(tracker.clone(), settings)
        .log_failure(&lint_event())
        .await
        .unwrap();
    assert_eq!(oldest.detection().duplicate_issue_id, Some(IssueId::from(7)));
}

#[tokio::test]
async fn test_snapshot_detection_is_idempotent() {
    let tracker = InMemoryTracker::new();
    tracker
        .insert(closed_lint(42, &[ResolutionLabel::PendingMerge], 2))
        .await;
    tracker.insert(closed_lint(41, &[], 3)).await;
    tracker
        .insert(tracked(
            50,
            Fingerprint::new("6", "build", "cargo build"),
            "L1",
            &[],
            days_ago(1),
            None,
        ))
        .await;

    let open = tracker.search(&SearchFilter::open("[feature-6]")).await.unwrap();
    let closed = tracker
        .search(&SearchFilter::closed("[feature-6]"))
        .await
        .unwrap();

    let first = classify(&lint_event(), &open, &closed, DuplicateTieBreak::default());
    let second = classify(&lint_event(), &open, &closed, DuplicateTieBreak::default());
    assert_eq!(first, second);
    assert_eq!(first.attempt_count, 2);
    assert_eq!(first.stale_issue_id, Some(IssueId::from(50)));
}

#[tokio::test]
async fn test_event_bus_receives_created_issue() {
    let tracker = Arc::new(InMemoryTracker::new());
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();

    let outcome = logger(tracker)
        .with_dispatcher(bus.clone())
        .log_failure(&lint_event())
        .await
        .unwrap();
    let FailureOutcome::Created {
        issue, dispatch, ..
    } = outcome
    else {
        panic!("expected Created");
    };
    assert_eq!(dispatch, DispatchStatus::Published);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type, "ci-failure-issue-created");
    assert_eq!(event.payload.issue_id, issue.id);
    assert_eq!(event.payload.fingerprint, lint_event().fingerprint());
    assert_eq!(event.payload.metadata.run_id, "9001");
}

// ---------------------------------------------------------------------------
// Misbehaving trackers
// ---------------------------------------------------------------------------

/// Fails searches for one ticket state; writes are recorded and succeed.
struct FlakyTracker {
    inner: InMemoryTracker,
    failing_state: IssueState,
}

#[async_trait]
impl IssueTracker for FlakyTracker {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError> {
        if filter.state == self.failing_state {
            return Err(TrackerError::Unavailable("502 Bad Gateway".into()));
        }
        self.inner.search(filter).await
    }

    async fn get(&self, id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError> {
        self.inner.get(id).await
    }

    async fn create(&self, issue: &NewIssue) -> Result<TrackedIssue, TrackerError> {
        self.inner.create(issue).await
    }

    async fn add_label(&self, id: &IssueId, label: ResolutionLabel) -> Result<(), TrackerError> {
        self.inner.add_label(id, label).await
    }

    async fn comment(&self, id: &IssueId, text: &str) -> Result<(), TrackerError> {
        self.inner.comment(id, text).await
    }
}

#[tokio::test]
async fn test_closed_search_failure_fails_closed() {
    let flaky = Arc::new(FlakyTracker {
        inner: InMemoryTracker::new(),
        failing_state: IssueState::Closed,
    });
    // An open sibling would normally be marked stale.
    flaky
        .inner
        .insert(tracked(
            30,
            Fingerprint::new("6", "test", "cargo test"),
            "L5",
            &[],
            days_ago(2),
            None,
        ))
        .await;

    let err = FailureLogger::new(flaky.clone(), LoggerSettings::default())
        .log_failure(&lint_event())
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::CollaboratorUnavailable);
    assert!(err.is_retriable());
    assert!(matches!(
        err,
        TriageError::CollaboratorUnavailable {
            operation: "search_closed",
            ..
        }
    ));
    assert_eq!(flaky.inner.calls().await.writes(), 0);
    assert_eq!(flaky.inner.len().await, 1);
}

#[tokio::test]
async fn test_open_search_failure_fails_closed() {
    let flaky = Arc::new(FlakyTracker {
        inner: InMemoryTracker::new(),
        failing_state: IssueState::Open,
    });

    let err = FailureLogger::new(flaky.clone(), LoggerSettings::default())
        .log_failure(&lint_event())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TriageError::CollaboratorUnavailable {
            operation: "search_open",
            ..
        }
    ));
    assert!(flaky.inner.is_empty().await);
}

/// Never answers within any reasonable time.
struct HangingTracker;

#[async_trait]
impl IssueTracker for HangingTracker {
    async fn search(&self, _filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn get(&self, _id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn create(&self, _issue: &NewIssue) -> Result<TrackedIssue, TrackerError> {
        panic!("create must not be reached when reads time out");
    }

    async fn add_label(&self, _id: &IssueId, _label: ResolutionLabel) -> Result<(), TrackerError> {
        panic!("add_label must not be reached when reads time out");
    }

    async fn comment(&self, _id: &IssueId, _text: &str) -> Result<(), TrackerError> {
        panic!("comment must not be reached when reads time out");
    }
}

#[tokio::test(start_paused = true)]
async fn test_search_timeout_aborts_classification() {
    let settings = LoggerSettings {
        tracker_timeout: Duration::from_secs(5),
        ..LoggerSettings::default()
    };
    let err = FailureLogger::new(Arc::new(HangingTracker), settings)
        .log_failure(&lint_event())
        .await
        .unwrap_err();

    match err {
        TriageError::CollaboratorUnavailable { operation, source } => {
            assert_eq!(operation, "search_open");
            assert!(matches!(
                source,
                TrackerError::Timeout { after, .. } if after == Duration::from_secs(5)
            ));
        }
        other => panic!("expected CollaboratorUnavailable, got {other:?}"),
    }
}

/// Hides one OPEN ticket from the first OPEN search only, as if a
/// concurrent logger created it right after our first read.
struct LateWriterTracker {
    inner: InMemoryTracker,
    late_id: IssueId,
    open_searches: AtomicUsize,
}

impl LateWriterTracker {
    fn new(late_id: u64) -> Self {
        Self {
            inner: InMemoryTracker::new(),
            late_id: IssueId::from(late_id),
            open_searches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IssueTracker for LateWriterTracker {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError> {
        let mut found = self.inner.search(filter).await?;
        let first_open =
            filter.state == IssueState::Open && self.open_searches.fetch_add(1, Ordering::SeqCst) == 0;
        if first_open {
            found.retain(|t| t.id != self.late_id);
        }
        Ok(found)
    }

    async fn get(&self, id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError> {
        self.inner.get(id).await
    }

    async fn create(&self, issue: &NewIssue) -> Result<TrackedIssue, TrackerError> {
        self.inner.create(issue).await
    }

    async fn add_label(&self, id: &IssueId, label: ResolutionLabel) -> Result<(), TrackerError> {
        self.inner.add_label(id, label).await
    }

    async fn comment(&self, id: &IssueId, text: &str) -> Result<(), TrackerError> {
        self.inner.comment(id, text).await
    }
}

#[tokio::test]
async fn test_recheck_before_create_catches_race() {
    let late = Arc::new(LateWriterTracker::new(90));
    late.inner
        .insert(tracked(
            90,
            lint_event().fingerprint(),
            "L120-L164",
            &[],
            Utc::now(),
            None,
        ))
        .await;

    let outcome = FailureLogger::new(late.clone(), LoggerSettings::default())
        .log_failure(&lint_event())
        .await
        .unwrap();

    assert!(matches!(outcome, FailureOutcome::Duplicate { raced: true, .. }));
    assert_eq!(outcome.detection().duplicate_issue_id, Some(IssueId::from(90)));
    assert_eq!(late.inner.calls().await.create, 0);
    assert_eq!(late.open_searches.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claims_allow_a_single_creator() {
    let tracker = Arc::new(InMemoryTracker::new());
    let claims = InMemoryClaims::new().shared();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let logger = FailureLogger::new(tracker.clone(), LoggerSettings::default())
            .with_claims(claims.clone());
        handles.push(tokio::spawn(async move {
            logger.log_failure(&lint_event()).await
        }));
    }

    let mut created_count = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.created_issue_id().is_some() {
            created_count += 1;
        }
    }

    assert_eq!(created_count, 1);
    assert_eq!(tracker.len().await, 1);
}

#[tokio::test]
async fn test_raced_duplicate_reports_stale_mark_already_written() {
    let late = Arc::new(LateWriterTracker::new(90));
    let sibling = Fingerprint::new("6", "test", "cargo test");
    late.inner
        .insert(tracked(50, sibling, "L1-L9", &[], days_ago(2), None))
        .await;
    late.inner
        .insert(tracked(
            90,
            lint_event().fingerprint(),
            "L120-L164",
            &[],
            Utc::now(),
            None,
        ))
        .await;

    let outcome = FailureLogger::new(late.clone(), LoggerSettings::default())
        .log_failure(&lint_event())
        .await
        .unwrap();

    let FailureOutcome::Duplicate { raced, stale, .. } = &outcome else {
        panic!("expected Duplicate, got {outcome:?}");
    };
    assert!(*raced);
    assert!(matches!(
        stale,
        Some(StaleMark::Marked { issue_id, .. }) if *issue_id == IssueId::from(50)
    ));
    assert_eq!(outcome.stale_mark().map(StaleMark::issue_id), Some(&IssueId::from(50)));
    assert_eq!(late.inner.comments(&IssueId::from(50)).await.len(), 1);
    assert_eq!(late.inner.calls().await.create, 0);
}

#[tokio::test]
async fn test_padded_identity_fields_match_trimmed_event() {
    let tracker = Arc::new(InMemoryTracker::new());
    let logger = logger(tracker.clone());

    let mut padded = lint_event();
    padded.feature_id = " 6".into();
    padded.step_name = "Run ESLint ".into();
    let first = logger.log_failure(&padded).await.unwrap();
    let issue = created(first);
    assert_eq!(issue.fingerprint, lint_event().fingerprint());
    assert_eq!(issue.title, "CI failure [feature-6] lint / Run ESLint");

    let second = logger.log_failure(&lint_event()).await.unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.detection().duplicate_issue_id, Some(issue.id));
    assert_eq!(tracker.len().await, 1);
}
