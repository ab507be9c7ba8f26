//! Collaborators injected into aggregate roots.

use std::fmt;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::handler::{NoopStoredEventHandler, StoredEventHandler};
use crate::repository::StoredEventRepository;
use crate::snapshot::SnapshotRepository;

/// The repositories, event hook and clock an `AggregateRoot` works with.
///
/// Assembled once at startup and cloned into every aggregate root; clones
/// share the same collaborators.
#[derive(Clone)]
pub struct Persistence {
    stored_events: Arc<dyn StoredEventRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    handler: Arc<dyn StoredEventHandler>,
    clock: Arc<dyn Clock>,
}

impl Persistence {
    /// Wires the two repositories with a no-op event handler and the system
    /// clock.
    #[must_use]
    pub fn new(
        stored_events: Arc<dyn StoredEventRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
    ) -> Self {
        Self {
            stored_events,
            snapshots,
            handler: Arc::new(NoopStoredEventHandler),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the handler offered every persisted event.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn StoredEventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replaces the clock used for snapshot timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The stored event repository.
    #[must_use]
    pub fn stored_events(&self) -> &Arc<dyn StoredEventRepository> {
        &self.stored_events
    }

    /// The snapshot repository.
    #[must_use]
    pub fn snapshots(&self) -> &Arc<dyn SnapshotRepository> {
        &self.snapshots
    }

    /// The persisted event handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn StoredEventHandler> {
        &self.handler
    }

    /// The clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}
