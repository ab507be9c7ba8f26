//! Row types and sqlx error mapping shared by the PostgreSQL repositories.

use chrono::{DateTime, Utc};
use eventide_core::config::EventClassMap;
use eventide_core::error::DomainError;
use eventide_core::repository::StoredEvent;
use eventide_core::snapshot::Snapshot;
use serde_json::Value;
use uuid::Uuid;

/// PostgreSQL error code for `lock_not_available`.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// A stored events row as selected or returned by an insert.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoredEventRow {
    id: i64,
    aggregate_uuid: Option<Uuid>,
    aggregate_version: Option<i64>,
    event_class: String,
    event_properties: Value,
    meta_data: Value,
    created_at: DateTime<Utc>,
}

impl StoredEventRow {
    /// Converts the row, resolving a stored alias back to its event class.
    pub(crate) fn into_stored_event(self, event_class_map: &EventClassMap) -> StoredEvent {
        StoredEvent {
            id: self.id,
            aggregate_uuid: self.aggregate_uuid,
            aggregate_version: self.aggregate_version,
            event_class: event_class_map.event_class(&self.event_class).to_owned(),
            event_properties: self.event_properties,
            meta_data: self.meta_data,
            created_at: self.created_at,
        }
    }
}

/// A snapshots row.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SnapshotRow {
    aggregate_uuid: Uuid,
    aggregate_version: i64,
    state: Value,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            aggregate_uuid: row.aggregate_uuid,
            aggregate_version: row.aggregate_version,
            state: row.state,
            created_at: row.created_at,
        }
    }
}

/// Maps a sqlx error onto the domain taxonomy: lock waits that hit
/// `lock_timeout` become `LockTimeout`, everything else (deadlocks included)
/// is `Infrastructure`.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> DomainError {
    if let sqlx::Error::Database(db) = &err
        && db.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
    {
        return DomainError::LockTimeout(db.message().to_owned());
    }
    DomainError::Infrastructure(err.to_string())
}

/// Returns `true` when `err` is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
