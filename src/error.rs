//! Engine Errors
//!
//! `EngineError` is what callers of the orchestrator see. `RemoteError` is
//! what a remote store adapter hands back; `classify` maps it to the
//! user-facing failure category.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::AllocationError;

/// Common result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type of remote store calls
pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("batch places two entries of shot {shot_id} at position {position}")]
    BatchCollision { shot_id: String, position: i64 },
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Structured error category an adapter may attach to a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    Constraint,
    Connectivity,
    Overloaded,
    NotFound,
    Other,
}

/// Rejection returned by a remote store
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: Option<RemoteErrorKind>,
    /// HTTP-like status, when the transport has one
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    /// Unclassified rejection; category is inferred from the message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_kind(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::with_kind(RemoteErrorKind::NotFound, what)
    }
}

/// User-facing failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No free position inside the probe window
    Allocation,
    /// Remote store refused a placement the engine considers legal
    InternalConstraint,
    Connectivity,
    Overloaded,
    Generic,
}

const CONSTRAINT_MARKERS: &[&str] = &["duplicate key", "unique constraint", "23505"];
const CONNECTIVITY_MARKERS: &[&str] = &[
    "network",
    "failed to fetch",
    "connection",
    "timeout",
    "timed out",
    "offline",
    "unreachable",
];
const OVERLOAD_MARKERS: &[&str] = &["429", "502", "503", "504", "overloaded", "too many requests"];
const OVERLOAD_STATUSES: &[u16] = &[429, 502, 503, 504];

/// Categorize a remote rejection.
///
/// A structured kind wins; otherwise the status code and then the message
/// text decide.
pub fn classify(err: &RemoteError) -> FailureKind {
    match err.kind {
        Some(RemoteErrorKind::Constraint) => return FailureKind::InternalConstraint,
        Some(RemoteErrorKind::Connectivity) => return FailureKind::Connectivity,
        Some(RemoteErrorKind::Overloaded) => return FailureKind::Overloaded,
        Some(RemoteErrorKind::NotFound) | Some(RemoteErrorKind::Other) => return FailureKind::Generic,
        None => {}
    }

    if let Some(status) = err.status {
        if OVERLOAD_STATUSES.contains(&status) {
            return FailureKind::Overloaded;
        }
    }

    let message = err.message.to_lowercase();
    let mentions = |markers: &[&str]| markers.iter().any(|m| message.contains(m));

    if mentions(CONSTRAINT_MARKERS) {
        FailureKind::InternalConstraint
    } else if mentions(OVERLOAD_MARKERS) {
        FailureKind::Overloaded
    } else if mentions(CONNECTIVITY_MARKERS) {
        FailureKind::Connectivity
    } else {
        FailureKind::Generic
    }
}

impl EngineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::Allocation(_) => FailureKind::Allocation,
            EngineError::Remote(err) => classify(err),
            _ => FailureKind::Generic,
        }
    }
}
