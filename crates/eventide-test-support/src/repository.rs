//! In-memory stored event repositories that mirror the PostgreSQL variants.
//!
//! Rows live in a `Mutex<Vec<StoredEvent>>` with the same uniqueness rule as
//! the table: at most one row per `(aggregate_uuid, aggregate_version)` when
//! both are set. Batches are staged on a copy and swapped in on success, so a
//! failed batch leaves nothing behind.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventide_core::clock::{Clock, SystemClock};
use eventide_core::config::{EventClassMap, RepositoryVariant};
use eventide_core::error::DomainError;
use eventide_core::event::PendingEvent;
use eventide_core::repository::{
    StoredEvent, StoredEventRepository, StoredEventStream, batch_versions,
};
use futures_util::StreamExt;
use futures_util::stream;
use tracing::warn;
use uuid::Uuid;

/// Insert rejected by the `(aggregate_uuid, aggregate_version)` constraint.
#[derive(Debug, Clone, Copy)]
struct UniqueViolation {
    aggregate_uuid: Uuid,
    aggregate_version: i64,
}

/// In-memory `StoredEventRepository` with strict or concurrent write
/// semantics.
///
/// The strict variant bumps a colliding version once before giving up; the
/// concurrent variant checks the fence before writing a batch and rejects a
/// uuid without a version.
pub struct InMemoryStoredEventRepository {
    variant: RepositoryVariant,
    event_class_map: EventClassMap,
    clock: Arc<dyn Clock>,
    rows: Mutex<Vec<StoredEvent>>,
}

impl InMemoryStoredEventRepository {
    /// Creates an empty repository with the given write semantics.
    #[must_use]
    pub fn new(variant: RepositoryVariant) -> Self {
        Self {
            variant,
            event_class_map: EventClassMap::default(),
            clock: Arc::new(SystemClock),
            rows: Mutex::new(Vec::new()),
        }
    }

    /// Creates an empty strict (single-writer) repository.
    #[must_use]
    pub fn strict() -> Self {
        Self::new(RepositoryVariant::Strict)
    }

    /// Creates an empty concurrent (fence-checked) repository.
    #[must_use]
    pub fn concurrent() -> Self {
        Self::new(RepositoryVariant::Concurrent)
    }

    /// Replaces the clock used for `created_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stores event classes under the aliases in `map`.
    #[must_use]
    pub fn with_event_class_map(mut self, map: EventClassMap) -> Self {
        self.event_class_map = map;
        self
    }

    /// Returns the write semantics of this repository.
    #[must_use]
    pub fn variant(&self) -> RepositoryVariant {
        self.variant
    }

    /// Returns every row as stored, with aliased class names left in place.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn stored_rows(&self) -> Vec<StoredEvent> {
        self.rows.lock().unwrap().clone()
    }

    fn select<F>(&self, filter: F) -> Vec<StoredEvent>
    where
        F: Fn(&StoredEvent) -> bool,
    {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| filter(row))
            .map(|row| self.read_form(row))
            .collect()
    }

    fn read_form(&self, row: &StoredEvent) -> StoredEvent {
        StoredEvent {
            event_class: self.event_class_map.event_class(&row.event_class).to_owned(),
            ..row.clone()
        }
    }

    fn insert(
        &self,
        rows: &mut Vec<StoredEvent>,
        event: &PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, UniqueViolation> {
        if let (Some(uuid), Some(version)) = (aggregate_uuid, aggregate_version) {
            let taken = rows.iter().any(|row| {
                row.aggregate_uuid == Some(uuid) && row.aggregate_version == Some(version)
            });
            if taken {
                return Err(UniqueViolation {
                    aggregate_uuid: uuid,
                    aggregate_version: version,
                });
            }
        }

        let row = StoredEvent {
            id: rows.last().map_or(1, |row| row.id + 1),
            aggregate_uuid,
            aggregate_version,
            event_class: self
                .event_class_map
                .stored_name(&event.event_class)
                .to_owned(),
            event_properties: event.event_properties.clone(),
            meta_data: event.meta_data.clone(),
            created_at: self.clock.now(),
        };
        rows.push(row.clone());
        Ok(self.read_form(&row))
    }

    /// Strict insert: a colliding version is bumped once. A second collision
    /// is a conflict against the writer's fence `expected`.
    fn insert_with_retry(
        &self,
        rows: &mut Vec<StoredEvent>,
        event: &PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
        expected: i64,
    ) -> Result<StoredEvent, DomainError> {
        match self.insert(rows, event, aggregate_uuid, aggregate_version) {
            Ok(stored) => Ok(stored),
            Err(violation) => {
                let bumped = violation.aggregate_version + 1;
                warn!(
                    aggregate_uuid = %violation.aggregate_uuid,
                    aggregate_version = violation.aggregate_version,
                    retry_version = bumped,
                    "aggregate version already taken, retrying with next version"
                );
                self.insert(rows, event, aggregate_uuid, Some(bumped))
                    .map_err(|second| {
                        DomainError::concurrency_conflict(
                            second.aggregate_uuid,
                            expected,
                            latest_version(rows, second.aggregate_uuid),
                        )
                    })
            }
        }
    }
}

impl Default for InMemoryStoredEventRepository {
    fn default() -> Self {
        Self::new(RepositoryVariant::default())
    }
}

impl std::fmt::Debug for InMemoryStoredEventRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStoredEventRepository")
            .field("variant", &self.variant)
            .field("event_class_map", &self.event_class_map)
            .finish_non_exhaustive()
    }
}

fn stream_of(events: Vec<StoredEvent>) -> StoredEventStream<'static> {
    stream::iter(events.into_iter().map(Ok)).boxed()
}

fn latest_version(rows: &[StoredEvent], aggregate_uuid: Uuid) -> i64 {
    rows.iter()
        .filter(|row| row.aggregate_uuid == Some(aggregate_uuid))
        .filter_map(|row| row.aggregate_version)
        .max()
        .unwrap_or(0)
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
impl StoredEventRepository for InMemoryStoredEventRepository {
    fn retrieve_all(&self, aggregate_uuid: Option<Uuid>) -> StoredEventStream<'_> {
        let events = self.select(|row| aggregate_uuid.is_none() || row.aggregate_uuid == aggregate_uuid);
        stream_of(events)
    }

    fn retrieve_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> StoredEventStream<'_> {
        let events = self.select(|row| {
            row.id >= starting_from
                && (aggregate_uuid.is_none() || row.aggregate_uuid == aggregate_uuid)
        });
        stream_of(events)
    }

    async fn count_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> Result<i64, DomainError> {
        let count = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                row.id >= starting_from
                    && (aggregate_uuid.is_none() || row.aggregate_uuid == aggregate_uuid)
            })
            .count();
        i64::try_from(count).map_err(|e| DomainError::Infrastructure(e.to_string()))
    }

    fn retrieve_all_after_version(
        &self,
        version: i64,
        aggregate_uuid: Uuid,
    ) -> StoredEventStream<'_> {
        let events = self.select(|row| {
            row.aggregate_uuid == Some(aggregate_uuid)
                && row.aggregate_version.is_some_and(|v| v > version)
        });
        stream_of(events)
    }

    async fn persist(
        &self,
        event: PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError> {
        let mut rows = self.rows.lock().unwrap();
        match self.variant {
            RepositoryVariant::Strict => self.insert_with_retry(
                &mut rows,
                &event,
                aggregate_uuid,
                aggregate_version,
                aggregate_version.map_or(0, |v| v - 1),
            ),
            RepositoryVariant::Concurrent => {
                require_version(aggregate_uuid, aggregate_version)?;
                self.insert(&mut rows, &event, aggregate_uuid, aggregate_version)
                    .map_err(|violation| {
                        DomainError::concurrency_conflict(
                            violation.aggregate_uuid,
                            violation.aggregate_version - 1,
                            latest_version(&rows, violation.aggregate_uuid),
                        )
                    })
            }
        }
    }

    async fn persist_many(
        &self,
        events: Vec<PendingEvent>,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        if self.variant == RepositoryVariant::Concurrent {
            require_version(aggregate_uuid, aggregate_version)?;
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = self.rows.lock().unwrap();
        let mut staged = rows.clone();
        let mut stored = Vec::with_capacity(events.len());
        let expected = aggregate_version.unwrap_or(0);

        match self.variant {
            RepositoryVariant::Strict => {
                let mut next_version = aggregate_uuid.map(|_| expected + 1);
                for event in &events {
                    let row = self.insert_with_retry(
                        &mut staged,
                        event,
                        aggregate_uuid,
                        next_version,
                        expected,
                    )?;
                    next_version = row.aggregate_version.map(|v| v + 1);
                    stored.push(row);
                }
            }
            RepositoryVariant::Concurrent => {
                if let Some(uuid) = aggregate_uuid {
                    let actual = latest_version(&staged, uuid);
                    if actual != expected {
                        return Err(DomainError::concurrency_conflict(uuid, expected, actual));
                    }
                }
                let versions = batch_versions(aggregate_uuid, aggregate_version, events.len());
                for (event, version) in events.iter().zip(versions) {
                    let row = self
                        .insert(&mut staged, event, aggregate_uuid, version)
                        .map_err(|violation| {
                            DomainError::concurrency_conflict(
                                violation.aggregate_uuid,
                                expected,
                                latest_version(&staged, violation.aggregate_uuid),
                            )
                        })?;
                    stored.push(row);
                }
            }
        }

        *rows = staged;
        Ok(stored)
    }

    async fn update(&self, stored_event: &StoredEvent) -> Result<StoredEvent, DomainError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|row| row.id == stored_event.id)
            .ok_or(DomainError::StoredEventNotFound(stored_event.id))?;
        row.event_properties = stored_event.event_properties.clone();
        row.meta_data = stored_event.meta_data.clone();
        let updated = row.clone();
        Ok(self.read_form(&updated))
    }

    async fn latest_aggregate_version(&self, aggregate_uuid: Uuid) -> Result<i64, DomainError> {
        Ok(latest_version(&self.rows.lock().unwrap(), aggregate_uuid))
    }
}

/// A stored event repository that always returns an infrastructure error.
/// Useful for testing error-handling paths.
#[derive(Debug, Default)]
pub struct FailingStoredEventRepository;

fn connection_refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl StoredEventRepository for FailingStoredEventRepository {
    fn retrieve_all(&self, _aggregate_uuid: Option<Uuid>) -> StoredEventStream<'_> {
        stream::once(async { Err(connection_refused()) }).boxed()
    }

    fn retrieve_all_starting_from(
        &self,
        _starting_from: i64,
        _aggregate_uuid: Option<Uuid>,
    ) -> StoredEventStream<'_> {
        stream::once(async { Err(connection_refused()) }).boxed()
    }

    async fn count_all_starting_from(
        &self,
        _starting_from: i64,
        _aggregate_uuid: Option<Uuid>,
    ) -> Result<i64, DomainError> {
        Err(connection_refused())
    }

    fn retrieve_all_after_version(
        &self,
        _version: i64,
        _aggregate_uuid: Uuid,
    ) -> StoredEventStream<'_> {
        stream::once(async { Err(connection_refused()) }).boxed()
    }

    async fn persist(
        &self,
        _event: PendingEvent,
        _aggregate_uuid: Option<Uuid>,
        _aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError> {
        Err(connection_refused())
    }

    async fn persist_many(
        &self,
        _events: Vec<PendingEvent>,
        _aggregate_uuid: Option<Uuid>,
        _aggregate_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(connection_refused())
    }

    async fn update(&self, _stored_event: &StoredEvent) -> Result<StoredEvent, DomainError> {
        Err(connection_refused())
    }

    async fn latest_aggregate_version(&self, _aggregate_uuid: Uuid) -> Result<i64, DomainError> {
        Err(connection_refused())
    }
}
