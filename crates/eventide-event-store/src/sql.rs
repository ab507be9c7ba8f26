//! SQL text for the stored events table, rendered once per repository.

const COLUMNS: &str =
    "id, aggregate_uuid, aggregate_version, event_class, event_properties, meta_data, created_at";

/// Row lock taken by event reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadLock {
    /// Plain reads.
    None,
    /// `FOR SHARE`: reads wait for in-flight writes to the same rows.
    Share,
}

impl ReadLock {
    fn clause(self) -> &'static str {
        match self {
            ReadLock::None => "",
            ReadLock::Share => " FOR SHARE",
        }
    }
}

/// Statements against one stored events table.
#[derive(Debug, Clone)]
pub(crate) struct StoredEventSql {
    pub(crate) retrieve_all: String,
    pub(crate) retrieve_all_starting_from: String,
    pub(crate) count_all_starting_from: String,
    pub(crate) retrieve_all_after_version: String,
    pub(crate) insert: String,
    pub(crate) update: String,
    pub(crate) latest_aggregate_version: String,
}

impl StoredEventSql {
    /// Renders the statements for `table`, which must already be validated.
    pub(crate) fn new(table: &str, read_lock: ReadLock) -> Self {
        let lock = read_lock.clause();
        Self {
            retrieve_all: format!(
                "SELECT {COLUMNS} FROM {table} \
                 WHERE ($1::uuid IS NULL OR aggregate_uuid = $1) \
                 ORDER BY id{lock}"
            ),
            retrieve_all_starting_from: format!(
                "SELECT {COLUMNS} FROM {table} \
                 WHERE id >= $1 AND ($2::uuid IS NULL OR aggregate_uuid = $2) \
                 ORDER BY id{lock}"
            ),
            count_all_starting_from: format!(
                "SELECT COUNT(id) FROM {table} \
                 WHERE id >= $1 AND ($2::uuid IS NULL OR aggregate_uuid = $2)"
            ),
            retrieve_all_after_version: format!(
                "SELECT {COLUMNS} FROM {table} \
                 WHERE aggregate_uuid = $1 AND aggregate_version > $2 \
                 ORDER BY id{lock}"
            ),
            insert: format!(
                "INSERT INTO {table} \
                 (aggregate_uuid, aggregate_version, event_class, event_properties, meta_data, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING {COLUMNS}"
            ),
            update: format!(
                "UPDATE {table} SET event_properties = $2, meta_data = $3 \
                 WHERE id = $1 \
                 RETURNING {COLUMNS}"
            ),
            latest_aggregate_version: format!(
                "SELECT COALESCE(MAX(aggregate_version), 0) FROM {table} \
                 WHERE aggregate_uuid = $1"
            ),
        }
    }
}
