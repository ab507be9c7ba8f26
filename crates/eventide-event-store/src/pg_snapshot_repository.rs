//! `PostgreSQL` implementation of the `SnapshotRepository` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use eventide_core::config::EventStoreConfig;
use eventide_core::error::DomainError;
use eventide_core::snapshot::{Snapshot, SnapshotRepository};

use crate::rows::{SnapshotRow, map_sqlx_error};

/// PostgreSQL-backed snapshot repository.
#[derive(Debug, Clone)]
pub struct PgSnapshotRepository {
    pool: PgPool,
    insert: String,
    latest: String,
}

impl PgSnapshotRepository {
    /// Creates a repository over the configured snapshots table.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if the table name is not a
    /// plain SQL identifier.
    pub fn new(pool: PgPool, config: &EventStoreConfig) -> Result<Self, DomainError> {
        config.validate()?;
        let table = &config.snapshots_table;
        Ok(Self {
            pool,
            insert: format!(
                "INSERT INTO {table} (aggregate_uuid, aggregate_version, state, created_at) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING aggregate_uuid, aggregate_version, state, created_at"
            ),
            latest: format!(
                "SELECT aggregate_uuid, aggregate_version, state, created_at FROM {table} \
                 WHERE aggregate_uuid = $1 \
                 ORDER BY aggregate_version DESC, id DESC \
                 LIMIT 1"
            ),
        })
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    #[instrument(
        skip(self, snapshot),
        fields(aggregate_uuid = %snapshot.aggregate_uuid, version = snapshot.aggregate_version)
    )]
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot, DomainError> {
        let row = sqlx::query_as::<_, SnapshotRow>(&self.insert)
            .bind(snapshot.aggregate_uuid)
            .bind(snapshot.aggregate_version)
            .bind(&snapshot.state)
            .bind(snapshot.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("snapshot stored");
        Ok(row.into())
    }

    async fn retrieve(&self, aggregate_uuid: Uuid) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query_as::<_, SnapshotRow>(&self.latest)
            .bind(aggregate_uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Snapshot::from))
    }
}
