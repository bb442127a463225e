//! Domain Layer - Core Entity Trait
//!
//! The basic contract for every record the repositories persist.

use serde::{Deserialize, Serialize};
use shotline::{Entry, Generation, RecordId, RemoteError, RemoteErrorKind, Shot};

/// Core trait for all stored entities
pub trait Entity: Sized + Send + Sync + Clone {
    /// The type of the entity's unique identifier
    type Id: Clone + Eq + std::hash::Hash + Send + Sync;

    /// Returns the entity's unique identifier
    fn id(&self) -> Self::Id;
}

impl Entity for Shot {
    type Id = RecordId;

    fn id(&self) -> RecordId {
        self.id.clone()
    }
}

impl Entity for Entry {
    type Id = RecordId;

    fn id(&self) -> RecordId {
        self.id.clone()
    }
}

impl Entity for Generation {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Common result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainError {
    NotFound(String),
    InvalidInput(String),
    /// A uniqueness or foreign-key constraint rejected the write
    Conflict(String),
    Internal(String),
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DomainError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            DomainError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            DomainError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}

impl From<DomainError> for RemoteError {
    fn from(err: DomainError) -> Self {
        let kind = match &err {
            DomainError::NotFound(_) => RemoteErrorKind::NotFound,
            DomainError::Conflict(_) => RemoteErrorKind::Constraint,
            DomainError::InvalidInput(_) | DomainError::Internal(_) => RemoteErrorKind::Other,
        };
        RemoteError::with_kind(kind, err.to_string())
    }
}

/// Server id of a committed record, as stored
pub fn row_id(id: &RecordId) -> DomainResult<i64> {
    id.as_committed()
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| DomainError::InvalidInput(format!("not a stored id: {}", id)))
}

pub fn parse_row_id(raw: &str) -> DomainResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| DomainError::InvalidInput(format!("not a stored id: {}", raw)))
}
