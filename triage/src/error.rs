//! Triage error taxonomy.
//!
//! | Category                | Surfaced | Retriable |
//! |-------------------------|----------|-----------|
//! | Validation              | yes      | no        |
//! | CollaboratorUnavailable | yes      | yes (re-submit the whole event) |
//! | Configuration           | yes      | no        |
//!
//! A ticket that is missing or already closed when a mutation is attempted
//! is not an error; it shows up as a skipped outcome. The same holds for two
//! OPEN tickets sharing a fingerprint, which is resolved by tie-break.

use std::fmt;

use thiserror::Error;

use crate::tracker::TrackerError;

/// Input rejected before any side effect. Names the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    /// Error for `field` with a human-readable reason.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Coarse classification used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    CollaboratorUnavailable,
    Configuration,
}

impl ErrorCategory {
    /// Whether re-submitting the event may succeed.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::CollaboratorUnavailable)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::CollaboratorUnavailable => write!(f, "collaborator_unavailable"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Unified error type for classification and resolution.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A tracker call failed or timed out. For reads during classification
    /// this aborts the whole event so no ticket is created on unknown state.
    #[error("issue tracker unavailable during {operation}: {source}")]
    CollaboratorUnavailable {
        operation: &'static str,
        #[source]
        source: TrackerError,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TriageError {
    /// Tracker failure during `operation`.
    pub fn unavailable(operation: &'static str, source: TrackerError) -> Self {
        Self::CollaboratorUnavailable { operation, source }
    }

    /// Coarse category for exit codes and telemetry.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::CollaboratorUnavailable { .. } => ErrorCategory::CollaboratorUnavailable,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Whether re-submitting the event may succeed.
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }
}

/// Result alias for the engine.
pub type TriageResult<T> = Result<T, TriageError>;
