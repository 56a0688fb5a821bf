//! CI-failure triage engine
//!
//! This library decides what to do with a CI failure signal given the
//! tickets already tracked for it, and drives label/comment transitions on
//! those tickets once a fix attempt finishes.
//!
//! # Flow
//!
//! ```text
//! FailureEvent ──▶ Duplicate Detector ──▶ duplicate? ── yes ──▶ stop
//!                                              │
//!                                              no
//!                                              ▼
//!                    Stale-Issue Marker (side effect, if a sibling is open)
//!                                              ▼
//!                                       Retry Detector
//!                                              ▼
//!                                       Issue Creator ──▶ Dispatcher.publish
//!
//! ResolutionRequest ──▶ Resolver ──▶ label + comment on the referenced ticket
//! ```
//!
//! The detectors in [`detect`] are pure functions over a ticket snapshot.
//! Everything that talks to the outside world goes through the
//! [`IssueTracker`] and [`Dispatcher`] traits.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use triage::{EventBus, FailureLogger, InMemoryTracker, LoggerSettings};
//!
//! let tracker = Arc::new(InMemoryTracker::new());
//! let bus = EventBus::new().shared();
//! let logger = FailureLogger::new(tracker, LoggerSettings::default()).with_dispatcher(bus);
//!
//! let outcome = logger.log_failure(&event).await?;
//! ```

pub mod claims;
pub mod creator;
pub mod detect;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod issue_body;
pub mod labels;
pub mod memory_tracker;
pub mod model;
pub mod resolver;
pub mod stale;
pub mod tracker;

pub use claims::{ClaimStore, InMemoryClaims, SharedClaims};
pub use creator::{CreatedIssue, DispatchStatus, IssueCreator};
pub use detect::{
    classify, detect_duplicate, detect_retry, DuplicateCheck, DuplicateTieBreak, RetryCheck,
};
pub use dispatch::{
    DispatchError, DispatchEvent, DispatchMetadata, DispatchPayload, Dispatcher, EventBus,
    SharedDispatcher, SharedEventBus,
};
pub use engine::{FailureLogger, FailureOutcome, LoggerSettings};
pub use error::{ErrorCategory, TriageError, TriageResult, ValidationError};
pub use issue_body::{
    parse_metadata, parse_title, render_body, title_for, title_pattern, TicketMetadata,
};
pub use labels::ResolutionLabel;
pub use memory_tracker::{InMemoryTracker, TrackerCalls};
pub use model::{DetectionResult, FailureEvent, Fingerprint, IssueId, IssueState, TrackedIssue};
pub use resolver::{
    RawResolutionRequest, ResolutionAction, ResolutionReport, ResolutionRequest, Resolver,
    RunStatus, SkipReason, Transition,
};
pub use stale::{StaleIssueMarker, StaleMark};
pub use tracker::{
    BoundedTracker, IssueTracker, NewIssue, SearchFilter, SharedTracker, TrackerError,
};
