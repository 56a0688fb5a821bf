//! In-memory issue tracker.
//!
//! Used by tests and by dry runs of the agent binary. Search matches by
//! state and title substring, the same over-approximation a real tracker
//! offers, and snapshots come back in insertion order.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::issue_body::parse_metadata;
use crate::labels::ResolutionLabel;
use crate::model::{IssueId, IssueState, TrackedIssue};
use crate::tracker::{IssueTracker, NewIssue, SearchFilter, TrackerError};

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerCalls {
    pub search: usize,
    pub get: usize,
    pub create: usize,
    pub add_label: usize,
    pub comment: usize,
}

impl TrackerCalls {
    /// Number of write calls (create, label, comment).
    pub fn writes(&self) -> usize {
        self.create + self.add_label + self.comment
    }
}

struct StoredIssue {
    issue: TrackedIssue,
    body: String,
    comments: Vec<String>,
}

#[derive(Default)]
struct Inner {
    issues: Vec<StoredIssue>,
    next_number: u64,
    calls: TrackerCalls,
}

impl Inner {
    fn find_mut(&mut self, id: &IssueId) -> Option<&mut StoredIssue> {
        self.issues.iter_mut().find(|s| &s.issue.id == id)
    }

    fn find(&self, id: &IssueId) -> Option<&StoredIssue> {
        self.issues.iter().find(|s| &s.issue.id == id)
    }
}

/// Mutex-guarded ticket collection implementing [`IssueTracker`].
#[derive(Default)]
pub struct InMemoryTracker {
    inner: Mutex<Inner>,
}

impl InMemoryTracker {
    /// Empty tracker. New tickets are numbered after the highest id seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing ticket. Numeric ids advance the id counter so
    /// created tickets never collide with seeded ones.
    pub async fn insert(&self, issue: TrackedIssue) {
        let mut inner = self.inner.lock().await;
        if let Ok(n) = issue.id.as_str().parse::<u64>() {
            inner.next_number = inner.next_number.max(n);
        }
        inner.issues.retain(|s| s.issue.id != issue.id);
        inner.issues.push(StoredIssue {
            issue,
            body: String::new(),
            comments: Vec::new(),
        });
    }

    /// Close a ticket, as a human or merge automation would.
    pub async fn close(&self, id: &IssueId, at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.find_mut(id) {
            Some(stored) => {
                stored.issue.state = IssueState::Closed;
                stored.issue.closed_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Snapshot of one ticket.
    pub async fn issue(&self, id: &IssueId) -> Option<TrackedIssue> {
        self.inner.lock().await.find(id).map(|s| s.issue.clone())
    }

    /// Stored body of a ticket.
    pub async fn body(&self, id: &IssueId) -> Option<String> {
        self.inner.lock().await.find(id).map(|s| s.body.clone())
    }

    /// Comments on a ticket, oldest first.
    pub async fn comments(&self, id: &IssueId) -> Vec<String> {
        self.inner
            .lock()
            .await
            .find(id)
            .map(|s| s.comments.clone())
            .unwrap_or_default()
    }

    /// Every ticket in insertion order.
    pub async fn issues(&self) -> Vec<TrackedIssue> {
        self.inner
            .lock()
            .await
            .issues
            .iter()
            .map(|s| s.issue.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.issues.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Calls made so far.
    pub async fn calls(&self) -> TrackerCalls {
        self.inner.lock().await.calls
    }
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError> {
        let mut inner = self.inner.lock().await;
        inner.calls.search += 1;
        Ok(inner
            .issues
            .iter()
            .filter(|s| s.issue.state == filter.state)
            .filter(|s| s.issue.title.contains(&filter.title_pattern))
            .map(|s| s.issue.clone())
            .collect())
    }

    async fn get(&self, id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError> {
        let mut inner = self.inner.lock().await;
        inner.calls.get += 1;
        Ok(inner.find(id).map(|s| s.issue.clone()))
    }

    async fn create(&self, issue: &NewIssue) -> Result<TrackedIssue, TrackerError> {
        let metadata = parse_metadata(&issue.body)
            .ok_or_else(|| TrackerError::Malformed("issue body has no triage metadata".into()))?;

        let mut inner = self.inner.lock().await;
        inner.calls.create += 1;
        inner.next_number += 1;

        let created = TrackedIssue {
            id: IssueId::from(inner.next_number),
            title: issue.title.clone(),
            state: IssueState::Open,
            labels: issue.labels.iter().copied().collect::<BTreeSet<_>>(),
            fingerprint: metadata.fingerprint,
            log_range: metadata.log_range,
            created_at: Utc::now(),
            closed_at: None,
        };
        inner.issues.push(StoredIssue {
            issue: created.clone(),
            body: issue.body.clone(),
            comments: Vec::new(),
        });
        Ok(created)
    }

    async fn add_label(&self, id: &IssueId, label: ResolutionLabel) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().await;
        inner.calls.add_label += 1;
        let stored = inner
            .find_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        stored.issue.labels.insert(label);
        Ok(())
    }

    async fn comment(&self, id: &IssueId, text: &str) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().await;
        inner.calls.comment += 1;
        let stored = inner
            .find_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        stored.comments.push(text.to_string());
        Ok(())
    }
}
