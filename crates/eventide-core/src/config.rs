//! Event store configuration.
//!
//! Values come from `Default` or from `EVENTIDE_*` environment variables:
//!
//! | Variable                      | Meaning                                   |
//! |-------------------------------|-------------------------------------------|
//! | `EVENTIDE_STORED_EVENTS_TABLE`| stored events table (`stored_events`)     |
//! | `EVENTIDE_SNAPSHOTS_TABLE`    | snapshots table (`snapshots`)             |
//! | `EVENTIDE_REPOSITORY`         | `strict` or `concurrent` (`concurrent`)   |
//! | `EVENTIDE_LOCK_TIMEOUT_MS`    | lock wait timeout for concurrent writes   |
//! | `EVENTIDE_EVENT_CLASS_MAP`    | `alias=event.type,...` class aliases      |

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DomainError;

/// Which stored event repository variant to wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepositoryVariant {
    /// Single-writer mode: relies on the unique constraint and retries a
    /// colliding version once.
    Strict,
    /// Fence-checked transactional writes; safe with multiple writers.
    #[default]
    Concurrent,
}

impl FromStr for RepositoryVariant {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(DomainError::InvalidConfiguration(format!(
                "unknown repository variant {other:?}, expected \"strict\" or \"concurrent\""
            ))),
        }
    }
}

impl fmt::Display for RepositoryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Aliases under which event classes are stored.
///
/// Lets an event type be renamed in code while old rows keep their stored
/// class name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventClassMap {
    alias_to_class: HashMap<String, String>,
}

impl EventClassMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `event_class` as `alias`.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>, event_class: impl Into<String>) -> Self {
        self.alias_to_class.insert(alias.into(), event_class.into());
        self
    }

    /// Name written to storage for `event_class`.
    #[must_use]
    pub fn stored_name<'a>(&'a self, event_class: &'a str) -> &'a str {
        self.alias_to_class
            .iter()
            .find(|(_, class)| class.as_str() == event_class)
            .map_or(event_class, |(alias, _)| alias.as_str())
    }

    /// Event class for a name read from storage.
    #[must_use]
    pub fn event_class<'a>(&'a self, stored_name: &'a str) -> &'a str {
        self.alias_to_class
            .get(stored_name)
            .map_or(stored_name, String::as_str)
    }

    /// Returns `true` when no alias is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alias_to_class.is_empty()
    }
}

impl FromStr for EventClassMap {
    type Err = DomainError;

    /// Parses `alias=event.type` pairs separated by commas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut map = Self::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (alias, class) = pair.split_once('=').ok_or_else(|| {
                DomainError::InvalidConfiguration(format!(
                    "event class alias {pair:?} must look like alias=event.type"
                ))
            })?;
            let (alias, class) = (alias.trim(), class.trim());
            if alias.is_empty() || class.is_empty() {
                return Err(DomainError::InvalidConfiguration(format!(
                    "event class alias {pair:?} has an empty side"
                )));
            }
            map = map.with_alias(alias, class);
        }
        Ok(map)
    }
}

/// Event store settings shared by all repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Table holding stored events.
    pub stored_events_table: String,
    /// Table holding snapshots.
    pub snapshots_table: String,
    /// Stored event repository variant.
    pub repository: RepositoryVariant,
    /// How long a concurrent write waits for a conflicting lock.
    pub lock_timeout: Option<Duration>,
    /// Event class aliases.
    pub event_class_map: EventClassMap,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            stored_events_table: "stored_events".to_owned(),
            snapshots_table: "snapshots".to_owned(),
            repository: RepositoryVariant::default(),
            lock_timeout: Some(Duration::from_secs(5)),
            event_class_map: EventClassMap::default(),
        }
    }
}

impl EventStoreConfig {
    /// Reads configuration from `EVENTIDE_*` environment variables, falling
    /// back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if a value does not parse
    /// or fails validation.
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if a value does not parse
    /// or fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(table) = lookup("EVENTIDE_STORED_EVENTS_TABLE") {
            config.stored_events_table = table;
        }
        if let Some(table) = lookup("EVENTIDE_SNAPSHOTS_TABLE") {
            config.snapshots_table = table;
        }
        if let Some(variant) = lookup("EVENTIDE_REPOSITORY") {
            config.repository = variant.parse()?;
        }
        if let Some(millis) = lookup("EVENTIDE_LOCK_TIMEOUT_MS") {
            let millis: u64 = millis.trim().parse().map_err(|e| {
                DomainError::InvalidConfiguration(format!(
                    "EVENTIDE_LOCK_TIMEOUT_MS must be a number of milliseconds: {e}"
                ))
            })?;
            // 0 disables the timeout, matching PostgreSQL's lock_timeout.
            config.lock_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(map) = lookup("EVENTIDE_EVENT_CLASS_MAP") {
            config.event_class_map = map.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that table names are plain SQL identifiers.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` naming the offending table.
    pub fn validate(&self) -> Result<(), DomainError> {
        for table in [&self.stored_events_table, &self.snapshots_table] {
            if !is_table_name(table) {
                return Err(DomainError::InvalidConfiguration(format!(
                    "table name {table:?} must be an identifier, optionally schema-qualified"
                )));
            }
        }
        Ok(())
    }
}

fn is_table_name(name: &str) -> bool {
    let mut parts = name.split('.');
    let valid = parts.by_ref().take(2).all(is_identifier);
    valid && parts.next().is_none() && !name.is_empty()
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && part.len() <= 63
}
