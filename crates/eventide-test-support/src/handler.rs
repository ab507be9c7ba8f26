//! Stored event handlers for asserting on the post-persist hook.

use std::sync::Mutex;

use async_trait::async_trait;
use eventide_core::error::DomainError;
use eventide_core::handler::StoredEventHandler;
use eventide_core::repository::StoredEvent;

/// A handler that records every event it is offered.
#[derive(Debug, Default)]
pub struct RecordingStoredEventHandler {
    handled: Mutex<Vec<StoredEvent>>,
}

impl RecordingStoredEventHandler {
    /// Creates a handler with nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handled events in the order they were offered.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn handled(&self) -> Vec<StoredEvent> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoredEventHandler for RecordingStoredEventHandler {
    async fn handle(&self, stored_event: &StoredEvent) -> Result<(), DomainError> {
        self.handled.lock().unwrap().push(stored_event.clone());
        Ok(())
    }
}

/// A handler that fails on every event.
#[derive(Debug, Default)]
pub struct FailingStoredEventHandler;

#[async_trait]
impl StoredEventHandler for FailingStoredEventHandler {
    async fn handle(&self, stored_event: &StoredEvent) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure(format!(
            "projector unavailable for stored event {}",
            stored_event.id
        )))
    }
}
