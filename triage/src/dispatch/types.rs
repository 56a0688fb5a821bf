//! Dispatch payload types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DetectionResult, FailureEvent, Fingerprint, IssueId};

/// Provenance and retry context forwarded to the fix consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetadata {
    pub title: String,
    pub log_range: String,
    pub branch_name: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    pub is_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of_issue_id: Option<IssueId>,
    pub attempt_count: u32,
}

/// What the fix consumer receives for a new ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub issue_id: IssueId,
    pub fingerprint: Fingerprint,
    pub metadata: DispatchMetadata,
}

impl DispatchPayload {
    /// Payload for a ticket created from `event`.
    pub fn new(
        issue_id: IssueId,
        title: &str,
        event: &FailureEvent,
        detection: &DetectionResult,
    ) -> Self {
        Self {
            issue_id,
            fingerprint: event.fingerprint(),
            metadata: DispatchMetadata {
                title: title.to_string(),
                log_range: event.log_range.clone(),
                branch_name: event.branch_name.clone(),
                run_id: event.run_id.clone(),
                pr_url: event.pr_url.clone(),
                is_retry: detection.is_retry,
                retry_of_issue_id: detection.retry_of_issue_id.clone(),
                attempt_count: detection.attempt_count,
            },
        }
    }
}

/// Envelope broadcast on the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub event_id: String,
    pub event_type: String,
    pub payload: DispatchPayload,
    pub timestamp: DateTime<Utc>,
}

impl DispatchEvent {
    /// Envelope with a fresh event id and timestamp.
    pub fn new(event_type: &str, payload: DispatchPayload) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_fingerprint_and_retry_context() {
        let event = FailureEvent {
            feature_id: "6".into(),
            job_name: "lint".into(),
            step_name: "Run ESLint".into(),
            log_range: "L1-L9".into(),
            branch_name: "feature/6".into(),
            run_id: "77".into(),
            pr_url: None,
        };
        let detection = DetectionResult {
            is_retry: true,
            retry_of_issue_id: Some(IssueId::from(42)),
            attempt_count: 2,
            ..DetectionResult::default()
        };
        let payload = DispatchPayload::new(IssueId::from(50), "title", &event, &detection);
        assert_eq!(payload.fingerprint, event.fingerprint());
        assert_eq!(payload.metadata.attempt_count, 2);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["issue_id"], "50");
        assert_eq!(json["fingerprint"]["job_name"], "lint");
        assert_eq!(json["metadata"]["retry_of_issue_id"], "42");
        assert!(json["metadata"].get("pr_url").is_none());
    }

    #[test]
    fn test_event_ids_unique() {
        let payload = DispatchPayload {
            issue_id: IssueId::from(1),
            fingerprint: Fingerprint::new("1", "a", "b"),
            metadata: DispatchMetadata {
                title: String::new(),
                log_range: String::new(),
                branch_name: String::new(),
                run_id: String::new(),
                pr_url: None,
                is_retry: false,
                retry_of_issue_id: None,
                attempt_count: 1,
            },
        };
        let a = DispatchEvent::new("x", payload.clone());
        let b = DispatchEvent::new("x", payload);
        assert_ne!(a.event_id, b.event_id);
    }
}
