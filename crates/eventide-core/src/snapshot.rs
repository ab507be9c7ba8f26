//! Snapshots: captured aggregate state at a known version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;

/// Aggregate state captured at `aggregate_version`. Replay resumes with the
/// events after that version.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_uuid: Uuid,
    /// Version of the aggregate at capture time.
    pub aggregate_version: i64,
    /// Exported aggregate state.
    pub state: Value,
    /// Capture time.
    pub created_at: DateTime<Utc>,
}

/// Repository for persisting and loading snapshots.
///
/// Snapshots accumulate: persisting a newer one supersedes older ones for
/// retrieval but does not remove them.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Stores a snapshot.
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot, DomainError>;

    /// Returns the snapshot with the highest version for `aggregate_uuid`.
    async fn retrieve(&self, aggregate_uuid: Uuid) -> Result<Option<Snapshot>, DomainError>;
}
