//! Aggregate root: identity, version fencing and the event lifecycle around an
//! `Aggregate`.
//!
//! An aggregate root is *made* (fresh, no storage access) or *retrieved*
//! (latest snapshot plus every later stored event replayed). Business code
//! then records events with [`AggregateRoot::record_that`], which applies them
//! immediately, and flushes them with [`AggregateRoot::persist`]. The version
//! reached after replay is the fence handed to the repository: storage must
//! still be at that version when the batch is written, or the whole batch is
//! rejected with `DomainError::ConcurrencyConflict`.

use std::fmt;
use std::sync::Arc;

use futures_util::TryStreamExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::event::{EventSerializer, PendingEvent};
use crate::persistence::Persistence;
use crate::snapshot::Snapshot;

/// An aggregate bound to its identity and event stream.
pub struct AggregateRoot<A: Aggregate> {
    uuid: Uuid,
    aggregate_version: i64,
    aggregate_version_after_reconstitution: i64,
    recorded_events: Vec<A::Event>,
    state: A,
    persistence: Persistence,
    serializer: Arc<dyn EventSerializer<A::Event>>,
    fake: bool,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates an aggregate with zero version and no history, without
    /// touching storage.
    #[must_use]
    pub fn make(uuid: Uuid, persistence: &Persistence) -> Self {
        Self {
            uuid,
            aggregate_version: 0,
            aggregate_version_after_reconstitution: 0,
            recorded_events: Vec::new(),
            state: A::default(),
            persistence: persistence.clone(),
            serializer: A::serializer(),
            fake: false,
        }
    }

    /// Reconstitutes an aggregate from its latest snapshot and the events
    /// stored after it. An identity without history yields a fresh aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if loading the snapshot or events fails, or if
    /// stored state does not deserialize.
    #[instrument(skip(persistence), fields(aggregate_type = A::TYPE))]
    pub async fn retrieve(uuid: Uuid, persistence: &Persistence) -> Result<Self, DomainError> {
        let mut root = Self::make(uuid, persistence);

        if let Some(snapshot) = persistence.snapshots().retrieve(uuid).await? {
            root.state = A::import_state(snapshot.state)?;
            root.aggregate_version = snapshot.aggregate_version;
            debug!(version = snapshot.aggregate_version, "restored snapshot");
        }

        let repository = Arc::clone(persistence.stored_events());
        let mut stored_events = repository.retrieve_all_after_version(root.aggregate_version, uuid);
        while let Some(stored) = stored_events.try_next().await? {
            let event = stored.event(root.serializer.as_ref())?;
            root.apply(&event);
        }

        root.aggregate_version_after_reconstitution = root.aggregate_version;
        debug!(version = root.aggregate_version, "reconstituted aggregate");

        Ok(root)
    }

    /// Builds an aggregate with a random identity whose history is `given`,
    /// without touching storage. Useful for testing business methods.
    #[must_use]
    pub fn fake<I>(given: I, persistence: &Persistence) -> Self
    where
        I: IntoIterator<Item = A::Event>,
    {
        let mut root = Self::make(Uuid::new_v4(), persistence);
        root.fake = true;
        root.given(given);
        root
    }

    /// Applies `events` as already-persisted history.
    pub fn given<I>(&mut self, events: I) -> &mut Self
    where
        I: IntoIterator<Item = A::Event>,
    {
        for event in events {
            self.apply(&event);
        }
        self.aggregate_version_after_reconstitution = self.aggregate_version;
        self
    }

    /// Records a new event and applies it, so later checks in the same
    /// operation see the updated state.
    pub fn record_that(&mut self, event: A::Event) -> &mut Self {
        self.apply(&event);
        self.recorded_events.push(event);
        self
    }

    /// Persists the recorded events behind the version fence.
    ///
    /// On success the fence advances by the number of stored events, the
    /// buffer is cleared and each stored event is offered to the handler. On
    /// failure nothing from the batch is stored and the buffer is kept; the
    /// aggregate should be retrieved again before retrying.
    ///
    /// If the stored versions drifted from the in-memory version, the events
    /// stay stored but are not offered to the handler.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if storage moved past the
    /// fence, or if the stored versions do not line up with the in-memory
    /// version afterwards. Returns other `DomainError`s from serialization,
    /// storage or the handler.
    #[instrument(
        skip(self),
        fields(
            aggregate_type = A::TYPE,
            aggregate_uuid = %self.uuid,
            expected_version = self.aggregate_version_after_reconstitution,
            events = self.recorded_events.len(),
        )
    )]
    pub async fn persist(&mut self) -> Result<&mut Self, DomainError> {
        if self.recorded_events.is_empty() {
            return Ok(self);
        }

        let pending = self
            .recorded_events
            .iter()
            .map(|event| PendingEvent::from_event(event, self.serializer.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let stored_events = self
            .persistence
            .stored_events()
            .persist_many(
                pending,
                Some(self.uuid),
                Some(self.aggregate_version_after_reconstitution),
            )
            .await
            .map_err(|e| e.with_aggregate_type(A::TYPE))?;

        self.recorded_events.clear();
        #[allow(clippy::cast_possible_wrap)]
        let persisted = stored_events.len() as i64;
        self.aggregate_version_after_reconstitution += persisted;
        debug!(
            version = self.aggregate_version_after_reconstitution,
            "persisted recorded events"
        );

        if !self.fake {
            let last_version = stored_events.last().and_then(|e| e.aggregate_version);
            if let Some(actual) = last_version.filter(|v| *v != self.aggregate_version) {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_type: A::TYPE.to_owned(),
                    aggregate_uuid: self.uuid,
                    expected: self.aggregate_version,
                    actual,
                });
            }
        }

        for stored in &stored_events {
            self.persistence.handler().handle(stored).await?;
        }

        Ok(self)
    }

    /// Captures the current state and version in a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the state cannot be exported or the snapshot
    /// repository fails.
    pub async fn snapshot(&self) -> Result<Snapshot, DomainError> {
        let snapshot = Snapshot {
            aggregate_uuid: self.uuid,
            aggregate_version: self.aggregate_version,
            state: self.state.export_state()?,
            created_at: self.persistence.clock().now(),
        };
        debug!(
            aggregate_uuid = %self.uuid,
            version = self.aggregate_version,
            "taking snapshot"
        );
        self.persistence.snapshots().persist(snapshot).await
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the aggregate type name.
    #[must_use]
    pub fn aggregate_type(&self) -> &'static str {
        A::TYPE
    }

    /// Returns the version of the last applied event.
    #[must_use]
    pub fn aggregate_version(&self) -> i64 {
        self.aggregate_version
    }

    /// Returns the version storage is expected to be at on the next persist.
    #[must_use]
    pub fn aggregate_version_after_reconstitution(&self) -> i64 {
        self.aggregate_version_after_reconstitution
    }

    /// Returns events recorded since the last successful persist.
    #[must_use]
    pub fn recorded_events(&self) -> &[A::Event] {
        &self.recorded_events
    }

    /// Returns the aggregate state.
    #[must_use]
    pub fn state(&self) -> &A {
        &self.state
    }

    fn apply(&mut self, event: &A::Event) {
        self.state.apply(event);
        self.aggregate_version += 1;
    }
}

impl<A> fmt::Debug for AggregateRoot<A>
where
    A: Aggregate + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("aggregate_type", &A::TYPE)
            .field("uuid", &self.uuid)
            .field("aggregate_version", &self.aggregate_version)
            .field(
                "aggregate_version_after_reconstitution",
                &self.aggregate_version_after_reconstitution,
            )
            .field("recorded_events", &self.recorded_events)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
