//! Failure logger: the classification pipeline.
//!
//! One call per incoming failure event:
//!
//! 1. Validate the event.
//! 2. Read the OPEN and CLOSED snapshots for the feature. Any read failure
//!    aborts the event before a single write (fail closed).
//! 3. Duplicate check. A duplicate stops here.
//! 4. Retry check, then mark the stale sibling if there is one.
//! 5. Claim the fingerprint key, when a claim store is configured.
//! 6. Re-read OPEN tickets right before creating; a duplicate that appeared
//!    in the meantime wins and nothing is created.
//! 7. Create the ticket and dispatch.
//!
//! The snapshots are not isolated from concurrent writers. Without a claim
//! store, two loggers racing on one fingerprint can both create a ticket;
//! the duplicate tie-break picks one of them on later runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::claims::SharedClaims;
use crate::creator::{DispatchStatus, IssueCreator, DEFAULT_DISPATCH_EVENT};
use crate::detect::{
    detect_duplicate, detect_retry, DuplicateCheck, DuplicateTieBreak, RetryCheck,
};
use crate::dispatch::SharedDispatcher;
use crate::error::{TriageError, TriageResult};
use crate::issue_body::title_pattern;
use crate::model::{DetectionResult, FailureEvent, IssueId, TrackedIssue};
use crate::stale::{StaleIssueMarker, StaleMark};
use crate::tracker::{BoundedTracker, SearchFilter, SharedTracker};

/// Tunables for [`FailureLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerSettings {
    pub tie_break: DuplicateTieBreak,
    /// Bound on every tracker call.
    pub tracker_timeout: Duration,
    /// Bound on the dispatch publish.
    pub dispatch_timeout: Duration,
    pub dispatch_event_type: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            tie_break: DuplicateTieBreak::default(),
            tracker_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(10),
            dispatch_event_type: DEFAULT_DISPATCH_EVENT.to_string(),
        }
    }
}

/// What happened to one failure event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Already tracked by an OPEN ticket.
    Duplicate {
        detection: DetectionResult,
        /// The duplicate appeared between classification and creation.
        raced: bool,
        /// Stale mark already written before the race was noticed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stale: Option<StaleMark>,
    },
    /// A new ticket was filed.
    Created {
        detection: DetectionResult,
        issue: TrackedIssue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stale: Option<StaleMark>,
        dispatch: DispatchStatus,
    },
    /// Another logger holds the fingerprint claim.
    Suppressed {
        detection: DetectionResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stale: Option<StaleMark>,
        claim_key: String,
    },
}

impl FailureOutcome {
    /// Classification behind this outcome.
    pub fn detection(&self) -> &DetectionResult {
        match self {
            Self::Duplicate { detection, .. }
            | Self::Created { detection, .. }
            | Self::Suppressed { detection, .. } => detection,
        }
    }

    /// Id of the ticket this event created, if any.
    pub fn created_issue_id(&self) -> Option<&IssueId> {
        match self {
            Self::Created { issue, .. } => Some(&issue.id),
            _ => None,
        }
    }

    /// Stale mark written while processing this event, if any.
    pub fn stale_mark(&self) -> Option<&StaleMark> {
        match self {
            Self::Duplicate { stale, .. }
            | Self::Created { stale, .. }
            | Self::Suppressed { stale, .. } => stale.as_ref(),
        }
    }

    /// Whether an OPEN ticket already tracked the failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Classifies failure events and files tickets for the new ones.
pub struct FailureLogger {
    tracker: SharedTracker,
    stale: StaleIssueMarker,
    creator: IssueCreator,
    claims: Option<SharedClaims>,
    settings: LoggerSettings,
}

impl FailureLogger {
    /// Every call to `tracker` is wrapped in the configured timeout.
    pub fn new(tracker: SharedTracker, settings: LoggerSettings) -> Self {
        let tracker = BoundedTracker::new(tracker, settings.tracker_timeout).shared();
        let creator = IssueCreator::new(tracker.clone())
            .with_event_type(settings.dispatch_event_type.clone())
            .with_dispatch_timeout(settings.dispatch_timeout);
        Self {
            stale: StaleIssueMarker::new(tracker.clone()),
            tracker,
            creator,
            claims: None,
            settings,
        }
    }

    /// Publish a dispatch event for every created ticket.
    pub fn with_dispatcher(mut self, dispatcher: SharedDispatcher) -> Self {
        self.creator = self.creator.with_dispatcher(dispatcher);
        self
    }

    /// Hold the fingerprint claim around creation.
    pub fn with_claims(mut self, claims: SharedClaims) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Settings this logger was built with.
    pub fn settings(&self) -> &LoggerSettings {
        &self.settings
    }

    /// Classify `event` and act on it. An `Err` means nothing was created
    /// and the caller may retry the whole event.
    pub async fn log_failure(&self, event: &FailureEvent) -> TriageResult<FailureOutcome> {
        event.validate()?;
        let fingerprint = event.fingerprint();
        let pattern = title_pattern(&fingerprint.feature_id);

        let open = self.search(SearchFilter::open(&pattern), "search_open").await?;
        let duplicate = self.check_duplicate(event, &open);
        if duplicate.is_duplicate {
            info!(
                fingerprint = %fingerprint,
                duplicate_of = ?duplicate.duplicate_issue_id.as_ref().map(IssueId::as_str),
                "Failure already tracked"
            );
            return Ok(FailureOutcome::Duplicate {
                detection: duplicate.into_detection(RetryCheck::first_attempt()),
                raced: false,
                stale: None,
            });
        }

        let closed = self
            .search(SearchFilter::closed(&pattern), "search_closed")
            .await?;
        let detection = duplicate.into_detection(detect_retry(event, &closed));
        info!(
            fingerprint = %fingerprint,
            is_retry = detection.is_retry,
            retry_of = ?detection.retry_of_issue_id.as_ref().map(IssueId::as_str),
            attempt_count = detection.attempt_count,
            stale = ?detection.stale_issue_id.as_ref().map(IssueId::as_str),
            "Failure classified"
        );

        let stale = match &detection.stale_issue_id {
            Some(id) => Some(self.stale.mark_stale(id).await),
            None => None,
        };

        let claim_key = fingerprint.key();
        if let Some(claims) = &self.claims {
            if !claims.try_claim(&claim_key).await {
                warn!(
                    fingerprint = %fingerprint,
                    claim_key = %claim_key,
                    "Fingerprint claimed by a concurrent logger; not creating"
                );
                return Ok(FailureOutcome::Suppressed {
                    detection,
                    stale,
                    claim_key,
                });
            }
        }

        let outcome = self.create_unless_raced(event, detection, stale).await;

        if let Some(claims) = &self.claims {
            claims.release(&claim_key).await;
        }
        outcome
    }

    async fn create_unless_raced(
        &self,
        event: &FailureEvent,
        detection: DetectionResult,
        stale: Option<StaleMark>,
    ) -> TriageResult<FailureOutcome> {
        let pattern = title_pattern(&event.fingerprint().feature_id);
        let open = self.search(SearchFilter::open(&pattern), "recheck_open").await?;
        let recheck = self.check_duplicate(event, &open);
        if recheck.is_duplicate {
            warn!(
                fingerprint = %event.fingerprint(),
                duplicate_of = ?recheck.duplicate_issue_id.as_ref().map(IssueId::as_str),
                stale_marked = ?stale.as_ref().map(|m| m.issue_id().as_str()),
                "Duplicate appeared during classification; not creating"
            );
            return Ok(FailureOutcome::Duplicate {
                detection: recheck.into_detection(RetryCheck::first_attempt()),
                raced: true,
                stale,
            });
        }

        let created = self
            .creator
            .create_issue(event, &detection)
            .await
            .map_err(|e| TriageError::unavailable("create_issue", e))?;

        Ok(FailureOutcome::Created {
            detection,
            issue: created.issue,
            stale,
            dispatch: created.dispatch,
        })
    }

    async fn search(
        &self,
        filter: SearchFilter,
        operation: &'static str,
    ) -> TriageResult<Vec<TrackedIssue>> {
        let tickets = self
            .tracker
            .search(&filter)
            .await
            .map_err(|e| TriageError::unavailable(operation, e))?;
        debug!(
            operation,
            state = %filter.state,
            pattern = %filter.title_pattern,
            count = tickets.len(),
            "Ticket snapshot read"
        );
        Ok(tickets)
    }

    fn check_duplicate(&self, event: &FailureEvent, open: &[TrackedIssue]) -> DuplicateCheck {
        let check = detect_duplicate(event, open, self.settings.tie_break);
        if check.has_anomaly() {
            let ids: Vec<&str> = check.anomaly.iter().map(IssueId::as_str).collect();
            warn!(
                anomaly = "duplicate_open_issues",
                fingerprint = %event.fingerprint(),
                candidates = ?ids,
                tie_break = %self.settings.tie_break,
                chosen = ?check.duplicate_issue_id.as_ref().map(IssueId::as_str),
                "Multiple OPEN issues share one fingerprint"
            );
        }
        check
    }
}
