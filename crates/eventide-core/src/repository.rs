//! Stored event repository abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{EventSerializer, PendingEvent};

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Storage-assigned, monotonically increasing identifier.
    pub id: i64,
    /// Aggregate this event belongs to; `None` for global events.
    pub aggregate_uuid: Option<Uuid>,
    /// 1-based position within the aggregate stream.
    pub aggregate_version: Option<i64>,
    /// Event type name for deserialization routing.
    pub event_class: String,
    /// Serialized event payload.
    pub event_properties: Value,
    /// Opaque metadata, reserved for future use.
    pub meta_data: Value,
    /// Timestamp of the write.
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Materializes the domain event from the stored payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not decode.
    pub fn event<E>(&self, serializer: &dyn EventSerializer<E>) -> Result<E, DomainError> {
        serializer.deserialize(&self.event_class, &self.event_properties)
    }
}

/// Lazy, finite sequence of stored events. Requesting a new stream restarts
/// the read from storage.
pub type StoredEventStream<'a> = BoxStream<'a, Result<StoredEvent, DomainError>>;

/// Repository for appending and reading stored events.
///
/// Every read returns events ordered by `id` (global append order).
#[async_trait]
pub trait StoredEventRepository: Send + Sync {
    /// Streams all events, optionally restricted to one aggregate.
    fn retrieve_all(&self, aggregate_uuid: Option<Uuid>) -> StoredEventStream<'_>;

    /// Streams events whose `id` is at least `starting_from`.
    fn retrieve_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> StoredEventStream<'_>;

    /// Counts events whose `id` is at least `starting_from`.
    async fn count_all_starting_from(
        &self,
        starting_from: i64,
        aggregate_uuid: Option<Uuid>,
    ) -> Result<i64, DomainError>;

    /// Streams the events of `aggregate_uuid` with a version greater than
    /// `version`.
    fn retrieve_all_after_version(&self, version: i64, aggregate_uuid: Uuid)
    -> StoredEventStream<'_>;

    /// Writes a single event.
    async fn persist(
        &self,
        event: PendingEvent,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError>;

    /// Writes a batch. When `aggregate_uuid` is set, event `i` is stored at
    /// version `aggregate_version + i + 1`.
    async fn persist_many(
        &self,
        events: Vec<PendingEvent>,
        aggregate_uuid: Option<Uuid>,
        aggregate_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Rewrites the payload and metadata of an existing event, looked up by
    /// `id`. Identity, version and class are never changed.
    async fn update(&self, stored_event: &StoredEvent) -> Result<StoredEvent, DomainError>;

    /// Returns the highest persisted version of an aggregate, or 0.
    async fn latest_aggregate_version(&self, aggregate_uuid: Uuid) -> Result<i64, DomainError>;
}

/// Versions assigned to a batch: `start + 1 ..= start + len` for aggregate
/// events, `None` for global ones.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn batch_versions(
    aggregate_uuid: Option<Uuid>,
    start: Option<i64>,
    len: usize,
) -> Vec<Option<i64>> {
    (0..len)
        .map(|idx| aggregate_uuid.map(|_| start.unwrap_or(0) + idx as i64 + 1))
        .collect()
}
