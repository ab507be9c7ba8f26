//! Hook offered every stored event after a successful persist.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::repository::StoredEvent;

/// Reacts to events once they are durably stored (projections, side effects).
#[async_trait]
pub trait StoredEventHandler: Send + Sync {
    /// Handles one persisted event.
    async fn handle(&self, stored_event: &StoredEvent) -> Result<(), DomainError>;
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStoredEventHandler;

#[async_trait]
impl StoredEventHandler for NoopStoredEventHandler {
    async fn handle(&self, _stored_event: &StoredEvent) -> Result<(), DomainError> {
        Ok(())
    }
}
