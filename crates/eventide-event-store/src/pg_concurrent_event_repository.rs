//! `PostgreSQL` stored event repository that is safe with several writers.
//!
//! A batch is written in one transaction that first takes a transaction-scoped
//! advisory lock for the aggregate, then verifies that the highest stored
//! version still equals the version the writer reconstituted from. Only then
//! are the events inserted. Writers on one aggregate are therefore serialized
//! and a stale writer fails before anything is written.
//!
//! The advisory lock key is a 64-bit hash of the aggregate uuid, so two
//! aggregates whose hashes collide also serialize against each other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use eventide_core::clock::Clock;
use eventide_core::config::EventStoreConfig;
use eventide_core::error::DomainError;
use eventide_core::event::PendingEvent;
use eventide_core::repository::{
    StoredEvent, StoredEventRepository, StoredEventStream, batch_versions,
};

use crate::rows::{is_unique_violation, map_sqlx_error};
use crate::sql::ReadLock;
use crate::table::PgEventTable;

/// Fence-checked PostgreSQL-backed stored event repository.
#[derive(Debug)]
pub struct PgConcurrentEventRepository {
    table: PgEventTable,
    lock_timeout: Option<Duration>,
}

impl PgConcurrentEventRepository {
    /// Creates a repository over the configured stored events table.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if the table name is not a
    /// plain SQL identifier.
    pub fn new(pool: PgPool, config: &EventStoreConfig) -> Result<Self, DomainError> {
        Ok(Self {
            table: PgEventTable::new(pool, config, ReadLock::Share)?,
            lock_timeout: config.lock_timeout,
        })
    }

    /// Replaces the clock used for `created_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.table.set_clock(clock);
        self
    }

    /// Fails with `ConcurrencyConflict` unless the highest stored version of
    /// `aggregate_uuid` equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` on a version mismatch, or an
    /// infrastructure error if the lookup fails.
    pub async fn ensure_no_other_events_have_been_persisted(
        &self,
        conn: &mut PgConnection,
        aggregate_uuid: Uuid,
        expected: i64,
    ) -> Result<(), DomainError> {
        let actual = self
            .table
            .latest_aggregate_version(conn, aggregate_uuid)
            .await?;
        if actual != expected {
            return Err(DomainError::concurrency_conflict(
                aggregate_uuid,
                expected,
                actual,
            ));
        }
        Ok(())
    }

    async fn lock_aggregate(
        &self,
        conn: &mut PgConnection,
        aggregate_uuid: Uuid,
    ) -> Result<(), DomainError> {
        if let Some(timeout) = self.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;
        }
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(aggregate_uuid.to_string())
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn require_version(
    aggregate_uuid: Option<Uuid>,
    aggregate_version: Option<i64>,
) -> Result<(), DomainError> {
    match (aggregate_uuid, aggregate_version) {
        (Some(uuid), None) => Err(DomainError::InvalidArgument(format!(
            "aggregate version is required when persisting events for aggregate {uuid}"
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl StoredEventRepository for PgConcurrentEventRepository {
    fn retrieve_all(&self, aggregate_uuid: Option<Uuid>) -> StoredEventStream<'_> {
        self.table.retrieve_all(aggregate_uuid)
    }

    fn retrieve_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> StoredEventStream<'_> {
        self.table
            .retrieve_all_starting_from(starting_from, aggregate_uuid)
    }

    async fn count_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> Result<i64, DomainError> {
        self.table
            .count_all_starting_from(starting_from, aggregate_uuid)
            .await
    }

    fn retrieve_all_after_version(
        &self,
        version: i64,
        aggregate_uuid: Uuid,
    ) -> StoredEventStream<'_> {
        self.table
            .retrieve_all_after_version(version, aggregate_uuid)
    }

    #[instrument(skip(self, event), fields(event_class = %event.event_class))]
    async fn persist(
        &self,
        event: PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError> {
        require_version(aggregate_uuid, aggregate_version)?;

        let mut conn = self.table.connection().await?;
        match self
            .table
            .insert(&mut conn, &event, aggregate_uuid, aggregate_version)
            .await
        {
            Ok(stored) => Ok(stored),
            Err(err) if is_unique_violation(&err) => {
                let (Some(uuid), Some(version)) = (aggregate_uuid, aggregate_version) else {
                    return Err(map_sqlx_error(err));
                };
                let actual = self.table.latest_aggregate_version(&mut conn, uuid).await?;
                Err(DomainError::concurrency_conflict(uuid, version - 1, actual))
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    #[instrument(
        skip(self, events),
        fields(aggregate_uuid = ?aggregate_uuid, expected_version = ?aggregate_version, events = events.len())
    )]
    async fn persist_many(
        &self,
        events: Vec<PendingEvent>,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        require_version(aggregate_uuid, aggregate_version)?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.table.pool.begin().await.map_err(map_sqlx_error)?;
        let expected = aggregate_version.unwrap_or(0);
        if let Some(uuid) = aggregate_uuid {
            self.lock_aggregate(&mut tx, uuid).await?;
            self.ensure_no_other_events_have_been_persisted(&mut tx, uuid, expected)
                .await?;
        }

        let versions = batch_versions(aggregate_uuid, aggregate_version, events.len());
        let mut stored_events = Vec::with_capacity(events.len());
        for (event, version) in events.iter().zip(versions) {
            match self.table.insert(&mut tx, event, aggregate_uuid, version).await {
                Ok(stored) => stored_events.push(stored),
                Err(err) => {
                    let Some(uuid) = aggregate_uuid.filter(|_| is_unique_violation(&err)) else {
                        return Err(map_sqlx_error(err));
                    };
                    // The failed insert aborted the transaction.
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    let mut conn = self.table.connection().await?;
                    let actual = self.table.latest_aggregate_version(&mut conn, uuid).await?;
                    return Err(DomainError::concurrency_conflict(uuid, expected, actual));
                }
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(persisted = stored_events.len(), "persisted batch");
        Ok(stored_events)
    }

    async fn update(&self, stored_event: &StoredEvent) -> Result<StoredEvent, DomainError> {
        self.table.update(stored_event).await
    }

    async fn latest_aggregate_version(&self, aggregate_uuid: Uuid) -> Result<i64, DomainError> {
        let mut conn = self.table.connection().await?;
        self.table
            .latest_aggregate_version(&mut conn, aggregate_uuid)
            .await
    }
}
