//! Domain event abstractions and the event serializer boundary.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DomainError;

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type name (stored as the event class and used for
    /// deserialization routing).
    fn event_type(&self) -> &'static str;
}

/// Converts domain events to and from their storable representation.
pub trait EventSerializer<E>: Send + Sync {
    /// Serializes an event into the payload stored in `event_properties`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the event cannot be encoded.
    fn serialize(&self, event: &E) -> Result<Value, DomainError>;

    /// Rebuilds an event from its stored class and payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be decoded
    /// or does not describe an event of `event_class`.
    fn deserialize(&self, event_class: &str, payload: &Value) -> Result<E, DomainError>;
}

/// Serde-backed JSON serializer for any `DomainEvent`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl<E> EventSerializer<E> for JsonEventSerializer
where
    E: DomainEvent + Serialize + DeserializeOwned,
{
    fn serialize(&self, event: &E) -> Result<Value, DomainError> {
        Ok(serde_json::to_value(event)?)
    }

    fn deserialize(&self, event_class: &str, payload: &Value) -> Result<E, DomainError> {
        let event: E = serde_json::from_value(payload.clone())?;
        if event.event_type() != event_class {
            return Err(DomainError::Serialization(format!(
                "stored event class {event_class} decoded as {}",
                event.event_type()
            )));
        }
        Ok(event)
    }
}

/// A serialized event that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    /// Event type name.
    pub event_class: String,
    /// Serialized event payload.
    pub event_properties: Value,
    /// Opaque metadata, reserved for future use.
    pub meta_data: Value,
}

impl PendingEvent {
    /// Serializes `event` with empty metadata.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the serializer fails.
    pub fn from_event<E>(event: &E, serializer: &dyn EventSerializer<E>) -> Result<Self, DomainError>
    where
        E: DomainEvent,
    {
        Ok(Self {
            event_class: event.event_type().to_owned(),
            event_properties: serializer.serialize(event)?,
            meta_data: empty_meta_data(),
        })
    }
}

/// The metadata stored for events that carry none.
#[must_use]
pub fn empty_meta_data() -> Value {
    Value::Object(serde_json::Map::new())
}
