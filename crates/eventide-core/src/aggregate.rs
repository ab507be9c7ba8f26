//! Aggregate state abstraction.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DomainError;
use crate::event::{DomainEvent, EventSerializer, JsonEventSerializer};

/// State of an event-sourced aggregate, rebuilt by applying its events.
///
/// `AggregateRoot` owns the identity, versions and recorded events; an
/// `Aggregate` only folds events into state.
pub trait Aggregate: Default + Send + Sync {
    /// Aggregate type name, reported in concurrency conflicts and logs.
    const TYPE: &'static str;

    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent + Serialize + DeserializeOwned + Clone;

    /// Apply an event to mutate internal state. Variants the aggregate does
    /// not react to still occupy a version slot, so they get an empty arm.
    fn apply(&mut self, event: &Self::Event);

    /// Exports the state stored in snapshots.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded.
    fn export_state(&self) -> Result<Value, DomainError>;

    /// Rebuilds state from a snapshot export.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `state` does not decode.
    fn import_state(state: Value) -> Result<Self, DomainError>;

    /// Serializer for this aggregate's events.
    #[must_use]
    fn serializer() -> Arc<dyn EventSerializer<Self::Event>> {
        Arc::new(JsonEventSerializer)
    }
}
