//! Source of the `created_at` timestamps stamped on stored events and
//! snapshots.
//!
//! Repositories and aggregate roots never read the system time directly; they
//! ask the `Clock` held by their `Persistence`, so tests can pin every
//! timestamp.

use chrono::{DateTime, SubsecRound, Utc};

/// Fractional-second digits kept by `SystemClock`, matching the microsecond
/// resolution of a `PostgreSQL` `timestamptz` column.
pub const TIMESTAMP_PRECISION: u16 = 6;

/// Stamps `created_at` on stored events and snapshots.
pub trait Clock: Send + Sync {
    /// Returns the timestamp for a row written now.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock truncated to microseconds, so an in-memory row and the same
/// row read back from `PostgreSQL` carry equal `created_at` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(TIMESTAMP_PRECISION)
    }
}
