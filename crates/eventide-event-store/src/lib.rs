//! `PostgreSQL` event store for Eventide.
//!
//! Provides the strict and concurrent stored event repositories, the snapshot
//! repository and the schema they expect.

use std::sync::Arc;

use eventide_core::config::{EventStoreConfig, RepositoryVariant};
use eventide_core::error::DomainError;
use eventide_core::persistence::Persistence;
use eventide_core::repository::StoredEventRepository;
use sqlx::PgPool;

pub mod pg_concurrent_event_repository;
pub mod pg_snapshot_repository;
pub mod pg_stored_event_repository;
mod rows;
pub mod schema;
mod sql;
mod table;

pub use pg_concurrent_event_repository::PgConcurrentEventRepository;
pub use pg_snapshot_repository::PgSnapshotRepository;
pub use pg_stored_event_repository::PgStoredEventRepository;

/// Wires the PostgreSQL repositories selected by `config` into a
/// `Persistence` with the default handler and clock.
///
/// # Errors
///
/// Returns `DomainError::InvalidConfiguration` if the configured table names
/// are not plain SQL identifiers.
pub fn persistence(pool: PgPool, config: &EventStoreConfig) -> Result<Persistence, DomainError> {
    let stored_events: Arc<dyn StoredEventRepository> = match config.repository {
        RepositoryVariant::Strict => Arc::new(PgStoredEventRepository::new(pool.clone(), config)?),
        RepositoryVariant::Concurrent => {
            Arc::new(PgConcurrentEventRepository::new(pool.clone(), config)?)
        }
    };
    let snapshots = Arc::new(PgSnapshotRepository::new(pool, config)?);
    tracing::debug!(repository = %config.repository, "wired event store");
    Ok(Persistence::new(stored_events, snapshots))
}
