//! Failure classification.
//!
//! Both detectors are pure functions over a ticket snapshot supplied by the
//! caller. The snapshot may come from an over-approximate tracker search;
//! exact fingerprint comparison happens here.
//!
//! | Detector  | Input tickets | Compares                       | Output |
//! |-----------|---------------|--------------------------------|--------|
//! | duplicate | OPEN          | fingerprint + log range        | duplicate id, stale id |
//! | retry     | CLOSED        | fingerprint only, labeled only | retry-of id, attempt count |

pub mod duplicate;
pub mod retry;

pub use duplicate::{detect_duplicate, DuplicateCheck, DuplicateTieBreak};
pub use retry::{detect_retry, RetryCheck};

use crate::model::{DetectionResult, FailureEvent, TrackedIssue};

/// Run both detectors and merge their answers.
///
/// The retry detector is skipped for duplicates, so a duplicate always
/// reports `attempt_count = 1` and no retry link.
pub fn classify(
    event: &FailureEvent,
    open_tickets: &[TrackedIssue],
    closed_tickets: &[TrackedIssue],
    tie_break: DuplicateTieBreak,
) -> DetectionResult {
    let duplicate = detect_duplicate(event, open_tickets, tie_break);
    if duplicate.is_duplicate {
        return duplicate.into_detection(RetryCheck::first_attempt());
    }
    let retry = detect_retry(event, closed_tickets);
    duplicate.into_detection(retry)
}
