//! Shared in-memory repositories, fixtures and utilities for Eventide tests.

mod account;
mod clock;
mod handler;
mod logging;
mod repository;
mod snapshot;
mod store;

pub use account::{
    ACCOUNT_LIMIT, Account, AccountCommands, AccountEvent, AccountLimitHit, AccountOpened,
    MoneyAdded, MoneySubtracted,
};
pub use clock::FixedClock;
pub use handler::{FailingStoredEventHandler, RecordingStoredEventHandler};
pub use logging::init_tracing;
pub use repository::{FailingStoredEventRepository, InMemoryStoredEventRepository};
pub use snapshot::InMemorySnapshotRepository;
pub use store::InMemoryStore;
