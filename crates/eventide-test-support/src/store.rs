//! A fully wired in-memory `Persistence` with handles on every collaborator.

use std::sync::Arc;

use eventide_core::config::RepositoryVariant;
use eventide_core::persistence::Persistence;

use crate::clock::FixedClock;
use crate::handler::RecordingStoredEventHandler;
use crate::repository::InMemoryStoredEventRepository;
use crate::snapshot::InMemorySnapshotRepository;

/// In-memory repositories, a recording handler and a fixed clock, wired into
/// one `Persistence`.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    /// Stored event repository.
    pub stored_events: Arc<InMemoryStoredEventRepository>,
    /// Snapshot repository.
    pub snapshots: Arc<InMemorySnapshotRepository>,
    /// Handler offered every persisted event.
    pub handler: Arc<RecordingStoredEventHandler>,
    /// The wiring handed to aggregate roots.
    pub persistence: Persistence,
}

impl InMemoryStore {
    /// Wires a store with the given write semantics.
    #[must_use]
    pub fn new(variant: RepositoryVariant) -> Self {
        let clock = Arc::new(FixedClock::reference());
        let stored_events =
            Arc::new(InMemoryStoredEventRepository::new(variant).with_clock(clock.clone()));
        let snapshots = Arc::new(InMemorySnapshotRepository::new());
        let handler = Arc::new(RecordingStoredEventHandler::new());
        let persistence = Persistence::new(stored_events.clone(), snapshots.clone())
            .with_handler(handler.clone())
            .with_clock(clock);
        Self {
            stored_events,
            snapshots,
            handler,
            persistence,
        }
    }

    /// Wires a store over a strict repository.
    #[must_use]
    pub fn strict() -> Self {
        Self::new(RepositoryVariant::Strict)
    }

    /// Wires a store over a concurrent repository.
    #[must_use]
    pub fn concurrent() -> Self {
        Self::new(RepositoryVariant::Concurrent)
    }
}
