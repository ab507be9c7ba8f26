//! `PostgreSQL` stored event repository for single-writer workloads.
//!
//! Writes carry no fence check; the `(aggregate_uuid, aggregate_version)`
//! unique constraint is the only guard. A colliding version is retried once
//! at the next version, and later events of the batch follow the bumped
//! version. The aggregate root's post-persist version check turns such a
//! drift into a `ConcurrencyConflict`, but two writers racing on one
//! aggregate can still interleave. Use `PgConcurrentEventRepository` when
//! more than one writer may touch an aggregate.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{instrument, warn};
use uuid::Uuid;

use eventide_core::clock::Clock;
use eventide_core::config::EventStoreConfig;
use eventide_core::error::DomainError;
use eventide_core::event::PendingEvent;
use eventide_core::repository::{StoredEvent, StoredEventRepository, StoredEventStream};

use crate::rows::{is_unique_violation, map_sqlx_error};
use crate::sql::ReadLock;
use crate::table::PgEventTable;

const SAVEPOINT: &str = "eventide_persist";

/// Strict PostgreSQL-backed stored event repository.
#[derive(Debug)]
pub struct PgStoredEventRepository {
    table: PgEventTable,
}

impl PgStoredEventRepository {
    /// Creates a repository over the configured stored events table.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if the table name is not a
    /// plain SQL identifier.
    pub fn new(pool: PgPool, config: &EventStoreConfig) -> Result<Self, DomainError> {
        Ok(Self {
            table: PgEventTable::new(pool, config, ReadLock::None)?,
        })
    }

    /// Replaces the clock used for `created_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.table.set_clock(clock);
        self
    }

    /// Inserts at `aggregate_version`, bumping once on a collision. A second
    /// collision is a conflict against the writer's fence `expected`.
    async fn insert_with_retry(
        &self,
        conn: &mut PgConnection,
        event: &PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
        expected: i64,
    ) -> Result<StoredEvent, DomainError> {
        let err = match self
            .insert_in_savepoint(conn, event, aggregate_uuid, aggregate_version)
            .await
        {
            Ok(stored) => return Ok(stored),
            Err(err) => err,
        };
        let (Some(uuid), Some(version), true) =
            (aggregate_uuid, aggregate_version, is_unique_violation(&err))
        else {
            return Err(map_sqlx_error(err));
        };

        let bumped = version + 1;
        warn!(
            aggregate_uuid = %uuid,
            aggregate_version = version,
            retry_version = bumped,
            "aggregate version already taken, retrying with next version"
        );
        match self
            .insert_in_savepoint(conn, event, aggregate_uuid, Some(bumped))
            .await
        {
            Ok(stored) => Ok(stored),
            Err(err) if is_unique_violation(&err) => {
                let actual = self.table.latest_aggregate_version(conn, uuid).await?;
                Err(DomainError::concurrency_conflict(uuid, expected, actual))
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    /// Inserts inside a savepoint so a failed insert leaves the surrounding
    /// transaction usable.
    async fn insert_in_savepoint(
        &self,
        conn: &mut PgConnection,
        event: &PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, sqlx::Error> {
        sqlx::query(&format!("SAVEPOINT {SAVEPOINT}"))
            .execute(&mut *conn)
            .await?;
        let inserted = self
            .table
            .insert(&mut *conn, event, aggregate_uuid, aggregate_version)
            .await;
        let finish = if inserted.is_ok() {
            format!("RELEASE SAVEPOINT {SAVEPOINT}")
        } else {
            format!("ROLLBACK TO SAVEPOINT {SAVEPOINT}")
        };
        sqlx::query(&finish).execute(&mut *conn).await?;
        inserted
    }
}

#[async_trait]
impl StoredEventRepository for PgStoredEventRepository {
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
        let mut tx = self.table.pool.begin().await.map_err(map_sqlx_error)?;
        let stored = self
            .insert_with_retry(
                &mut tx,
                &event,
                aggregate_uuid,
                aggregate_version,
                aggregate_version.map_or(0, |v| v - 1),
            )
            .await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(stored)
    }

    #[instrument(skip(self, events), fields(events = events.len()))]
    async fn persist_many(
        &self,
        events: Vec<PendingEvent>,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.table.pool.begin().await.map_err(map_sqlx_error)?;
        let expected = aggregate_version.unwrap_or(0);
        let mut next_version = aggregate_uuid.map(|_| expected + 1);
        let mut stored_events = Vec::with_capacity(events.len());
        for event in &events {
            let stored = self
                .insert_with_retry(&mut tx, event, aggregate_uuid, next_version, expected)
                .await?;
            next_version = stored.aggregate_version.map(|v| v + 1);
            stored_events.push(stored);
        }
        tx.commit().await.map_err(map_sqlx_error)?;

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
