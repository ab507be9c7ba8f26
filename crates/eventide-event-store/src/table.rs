//! Access to one stored events table, shared by both repository variants.

use std::fmt;
use std::sync::Arc;

use eventide_core::clock::{Clock, SystemClock};
use eventide_core::config::{EventClassMap, EventStoreConfig};
use eventide_core::error::DomainError;
use eventide_core::event::PendingEvent;
use eventide_core::repository::{StoredEvent, StoredEventStream};
use futures_util::{StreamExt, TryStreamExt};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::rows::{StoredEventRow, map_sqlx_error};
use crate::sql::{ReadLock, StoredEventSql};

pub(crate) struct PgEventTable {
    pub(crate) pool: PgPool,
    sql: StoredEventSql,
    event_class_map: EventClassMap,
    clock: Arc<dyn Clock>,
}

impl PgEventTable {
    /// Builds table access for a validated configuration.
    pub(crate) fn new(
        pool: PgPool,
        config: &EventStoreConfig,
        read_lock: ReadLock,
    ) -> Result<Self, DomainError> {
        config.validate()?;
        Ok(Self {
            pool,
            sql: StoredEventSql::new(&config.stored_events_table, read_lock),
            event_class_map: config.event_class_map.clone(),
            clock: Arc::new(SystemClock),
        })
    }

    pub(crate) fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    fn stream<'a>(
        &'a self,
        rows: futures_util::stream::BoxStream<'a, Result<StoredEventRow, sqlx::Error>>,
    ) -> StoredEventStream<'a> {
        rows.map_ok(|row| row.into_stored_event(&self.event_class_map))
            .map_err(map_sqlx_error)
            .boxed()
    }

    pub(crate) fn retrieve_all(&self, aggregate_uuid: Option<Uuid>) -> StoredEventStream<'_> {
        let rows = sqlx::query_as::<_, StoredEventRow>(&self.sql.retrieve_all)
            .bind(aggregate_uuid)
            .fetch(&self.pool);
        self.stream(rows)
    }

    pub(crate) fn retrieve_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> StoredEventStream<'_> {
        let rows = sqlx::query_as::<_, StoredEventRow>(&self.sql.retrieve_all_starting_from)
            .bind(starting_from)
            .bind(aggregate_uuid)
            .fetch(&self.pool);
        self.stream(rows)
    }

    pub(crate) async fn count_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(&self.sql.count_all_starting_from)
            .bind(starting_from)
            .bind(aggregate_uuid)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    pub(crate) fn retrieve_all_after_version(
        &self,
        version: i64,
        aggregate_uuid: Uuid,
    ) -> StoredEventStream<'_> {
        let rows = sqlx::query_as::<_, StoredEventRow>(&self.sql.retrieve_all_after_version)
            .bind(aggregate_uuid)
            .bind(version)
            .fetch(&self.pool);
        self.stream(rows)
    }

    /// Inserts one row on `conn`. The raw sqlx error is returned so callers
    /// can tell unique violations apart.
    pub(crate) async fn insert(
        &self,
        conn: &mut PgConnection,
        event: &PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, sqlx::Error> {
        let row = sqlx::query_as::<_, StoredEventRow>(&self.sql.insert)
            .bind(aggregate_uuid)
            .bind(aggregate_version)
            .bind(self.event_class_map.stored_name(&event.event_class))
            .bind(&event.event_properties)
            .bind(&event.meta_data)
            .bind(self.clock.now())
            .fetch_one(conn)
            .await?;
        Ok(row.into_stored_event(&self.event_class_map))
    }

    pub(crate) async fn update(&self, stored_event: &StoredEvent) -> Result<StoredEvent, DomainError> {
        let row = sqlx::query_as::<_, StoredEventRow>(&self.sql.update)
            .bind(stored_event.id)
            .bind(&stored_event.event_properties)
            .bind(&stored_event.meta_data)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(DomainError::StoredEventNotFound(stored_event.id))?;
        Ok(row.into_stored_event(&self.event_class_map))
    }

    pub(crate) async fn latest_aggregate_version(
        &self,
        conn: &mut PgConnection,
        aggregate_uuid: Uuid,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(&self.sql.latest_aggregate_version)
            .bind(aggregate_uuid)
            .fetch_one(conn)
            .await
            .map_err(map_sqlx_error)
    }

    pub(crate) async fn connection(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, DomainError> {
        self.pool.acquire().await.map_err(map_sqlx_error)
    }
}

impl fmt::Debug for PgEventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgEventTable")
            .field("sql", &self.sql)
            .field("event_class_map", &self.event_class_map)
            .finish_non_exhaustive()
    }
}
