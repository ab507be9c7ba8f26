//! In-memory snapshot repository.

use std::sync::Mutex;

use async_trait::async_trait;
use eventide_core::error::DomainError;
use eventide_core::snapshot::{Snapshot, SnapshotRepository};
use uuid::Uuid;

/// Keeps every persisted snapshot in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotRepository {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl InMemorySnapshotRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all persisted snapshots in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn persisted(&self) -> Vec<Snapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot, DomainError> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(snapshot)
    }

    async fn retrieve(&self, aggregate_uuid: Uuid) -> Result<Option<Snapshot>, DomainError> {
        // `max_by_key` keeps the last maximum, i.e. the newest on ties.
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.aggregate_uuid == aggregate_uuid)
            .max_by_key(|s| s.aggregate_version)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn snapshot(uuid: Uuid, version: i64, balance: i64) -> Snapshot {
        Snapshot {
            aggregate_uuid: uuid,
            aggregate_version: version,
            state: json!({ "balance": balance }),
            created_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_returns_highest_version_newest_on_ties() {
        // Arrange
        let repo = InMemorySnapshotRepository::new();
        let uuid = Uuid::new_v4();
        repo.persist(snapshot(uuid, 5, 50)).await.unwrap();
        repo.persist(snapshot(uuid, 3, 30)).await.unwrap();
        repo.persist(snapshot(uuid, 5, 55)).await.unwrap();
        repo.persist(snapshot(Uuid::new_v4(), 9, 90)).await.unwrap();

        // Act
        let latest = repo.retrieve(uuid).await.unwrap().unwrap();

        // Assert
        assert_eq!(latest.aggregate_version, 5);
        assert_eq!(latest.state, json!({ "balance": 55 }));
        assert_eq!(repo.persisted().len(), 4);
    }

    #[tokio::test]
    async fn test_retrieve_without_snapshot_is_none() {
        let repo = InMemorySnapshotRepository::new();

        assert!(repo.retrieve(Uuid::new_v4()).await.unwrap().is_none());
    }
}
