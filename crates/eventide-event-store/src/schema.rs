//! Event store database schema.
//!
//! Table names come from `EventStoreConfig`, so the DDL is rendered per
//! configuration rather than kept as constants.

use eventide_core::config::EventStoreConfig;
use eventide_core::error::DomainError;
use sqlx::PgPool;
use tracing::debug;

use crate::rows::map_sqlx_error;

/// SQL to create a stored events table named `table`.
#[must_use]
pub fn stored_events_ddl(table: &str) -> String {
    let name = index_prefix(table);
    format!(
        r"
CREATE TABLE IF NOT EXISTS {table} (
    id                BIGSERIAL PRIMARY KEY,
    aggregate_uuid    UUID NULL,
    aggregate_version BIGINT NULL,
    event_class       VARCHAR(255) NOT NULL,
    event_properties  JSONB NOT NULL,
    meta_data         JSONB NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL,
    UNIQUE (aggregate_uuid, aggregate_version)
);

CREATE INDEX IF NOT EXISTS {name}_event_class_index
    ON {table} (event_class);

CREATE INDEX IF NOT EXISTS {name}_aggregate_uuid_index
    ON {table} (aggregate_uuid);
"
    )
}

/// SQL to create a snapshots table named `table`.
#[must_use]
pub fn snapshots_ddl(table: &str) -> String {
    let name = index_prefix(table);
    format!(
        r"
CREATE TABLE IF NOT EXISTS {table} (
    id                BIGSERIAL PRIMARY KEY,
    aggregate_uuid    UUID NOT NULL,
    aggregate_version BIGINT NOT NULL,
    state             JSONB NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS {name}_aggregate_uuid_index
    ON {table} (aggregate_uuid);
"
    )
}

/// Creates the configured schema (if qualified) and both tables. Safe to run
/// repeatedly.
///
/// # Errors
///
/// Returns `DomainError::InvalidConfiguration` for unusable table names and
/// `DomainError::Infrastructure` if the DDL fails.
pub async fn provision(pool: &PgPool, config: &EventStoreConfig) -> Result<(), DomainError> {
    config.validate()?;

    let mut ddl = String::new();
    for table in [&config.stored_events_table, &config.snapshots_table] {
        if let Some((schema, _)) = table.split_once('.') {
            ddl.push_str(&format!("CREATE SCHEMA IF NOT EXISTS {schema};\n"));
        }
    }
    ddl.push_str(&stored_events_ddl(&config.stored_events_table));
    ddl.push_str(&snapshots_ddl(&config.snapshots_table));

    sqlx::raw_sql(&ddl)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    debug!(
        stored_events_table = %config.stored_events_table,
        snapshots_table = %config.snapshots_table,
        "provisioned event store schema"
    );
    Ok(())
}

/// Index names live in the table's schema and cannot be qualified.
fn index_prefix(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_events_ddl_uses_configured_table() {
        let ddl = stored_events_ddl("ledger.account_events");

        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS ledger.account_events ("));
        assert!(ddl.contains("UNIQUE (aggregate_uuid, aggregate_version)"));
        assert!(ddl.contains("account_events_event_class_index"));
        assert!(!ddl.contains("ledger.account_events_event_class_index"));
    }

    #[test]
    fn test_snapshots_ddl_indexes_aggregate_uuid() {
        let ddl = snapshots_ddl("snapshots");

        assert!(ddl.contains("snapshots_aggregate_uuid_index"));
        assert!(ddl.contains("state             JSONB NOT NULL"));
    }
}
