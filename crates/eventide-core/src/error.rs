//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Aggregate type reported by repositories, which do not know which aggregate
/// they are persisting for.
pub const UNKNOWN_AGGREGATE_TYPE: &str = "aggregate";

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Optimistic concurrency conflict: another writer persisted events for
    /// the aggregate after it was retrieved.
    #[error(
        "could not persist aggregate {aggregate_type} (uuid: {aggregate_uuid}) because it seems to be changed by another process after it was retrieved: expected to persist events after version {expected}, but version {actual} was already persisted"
    )]
    ConcurrencyConflict {
        /// The aggregate type name.
        aggregate_type: String,
        /// The aggregate that had the conflict.
        aggregate_uuid: Uuid,
        /// The fence version the writer expected.
        expected: i64,
        /// The version found in storage.
        actual: i64,
    },

    /// The repository or store configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A repository was called with an invalid combination of arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored event targeted by an update does not exist.
    #[error("stored event not found: {0}")]
    StoredEventNotFound(i64),

    /// An event, snapshot state or payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A storage lock could not be acquired within the configured timeout.
    #[error("lock wait timeout: {0}")]
    LockTimeout(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Builds a `ConcurrencyConflict` for a repository that does not know the
    /// aggregate type.
    #[must_use]
    pub fn concurrency_conflict(aggregate_uuid: Uuid, expected: i64, actual: i64) -> Self {
        Self::ConcurrencyConflict {
            aggregate_type: UNKNOWN_AGGREGATE_TYPE.to_owned(),
            aggregate_uuid,
            expected,
            actual,
        }
    }

    /// Names the aggregate type on a `ConcurrencyConflict`. Other variants are
    /// returned unchanged.
    #[must_use]
    pub fn with_aggregate_type(self, name: &str) -> Self {
        match self {
            Self::ConcurrencyConflict {
                aggregate_uuid,
                expected,
                actual,
                ..
            } => Self::ConcurrencyConflict {
                aggregate_type: name.to_owned(),
                aggregate_uuid,
                expected,
                actual,
            },
            other => other,
        }
    }

    /// Returns `true` for optimistic concurrency conflicts.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
