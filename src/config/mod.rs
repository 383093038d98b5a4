//! Configuration for a reconciliation run.
//!
//! A [`SyncConfig`] names the logical store connections, where the queue and
//! target collections live, how big a queue page is, which queue fields carry
//! identity/status/payload, and how verbose logging is. `SyncConfig::default()`
//! reproduces the stock recovery setup; [`SyncConfigLoader`] layers a TOML or
//! JSON file and environment overrides on top of it.

pub mod loader;

pub use loader::SyncConfigLoader;

use crate::constants::{
    DEFAULT_ADDRESS, DEFAULT_CACHE_TTL_SECS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_LOG_LEVEL,
    DEFAULT_PAGE_LIMIT, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_ID_FIELD, DEFAULT_QUEUE_PAYLOAD_FIELD,
    DEFAULT_QUEUE_STATUS_FIELD, DESTINATION_CONNECTION, QUEUE_COLLECTION, RECOVERY_DATABASE,
    SOURCE_CONNECTION, TARGET_COLLECTION,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::store::CollectionLocation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Logical store connections, opened once per run
    pub connections: Vec<ConnectionConfig>,
    /// Where pending change records are read from
    pub queue: CollectionLocation,
    /// Collection the changes are applied to
    pub target: CollectionLocation,
    /// Maximum number of queue records read in one run
    pub page_limit: usize,
    /// Queue record field names
    pub fields: QueueFields,
    pub logging: LoggingSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connections: vec![
                ConnectionConfig::new(SOURCE_CONNECTION, DEFAULT_ADDRESS),
                ConnectionConfig::new(DESTINATION_CONNECTION, DEFAULT_ADDRESS),
            ],
            queue: CollectionLocation::new(SOURCE_CONNECTION, RECOVERY_DATABASE, QUEUE_COLLECTION),
            target: CollectionLocation::new(
                DESTINATION_CONNECTION,
                RECOVERY_DATABASE,
                TARGET_COLLECTION,
            ),
            page_limit: DEFAULT_PAGE_LIMIT,
            fields: QueueFields::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SyncConfig {
    /// Looks up a connection by its logical name.
    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Mutable lookup, used by environment overrides.
    pub fn connection_mut(&mut self, name: &str) -> Option<&mut ConnectionConfig> {
        self.connections.iter_mut().find(|c| c.name == name)
    }

    /// Checks the configuration for values a run cannot work with.
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.page_limit == 0 {
            return Err(ReconcileError::config("page_limit must be at least 1"));
        }

        let mut seen = HashSet::new();
        for connection in &self.connections {
            connection.validate()?;
            if !seen.insert(connection.name.as_str()) {
                return Err(ReconcileError::config(format!(
                    "duplicate connection name '{}'",
                    connection.name
                )));
            }
        }

        for (role, location) in [("queue", &self.queue), ("target", &self.target)] {
            location
                .validate()
                .map_err(|e| ReconcileError::config(format!("{} location: {}", role, e)))?;
            if self.connection(&location.connection).is_none() {
                return Err(ReconcileError::config(format!(
                    "{} location uses unknown connection '{}'",
                    role, location.connection
                )));
            }
        }

        self.fields.validate()?;
        self.logging.validate()
    }
}

/// Settings for one logical store connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Logical name operations refer to
    pub name: String,
    /// Database directory, or `memory:` for a throwaway database
    pub address: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Read cache toggle; accepted for compatibility, never applied
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            use_cache: false,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> ReconcileResult<()> {
        if self.name.trim().is_empty() {
            return Err(ReconcileError::config("connection name must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(ReconcileError::config(format!(
                "connection '{}' has an empty address",
                self.name
            )));
        }
        if self.pool_size == 0 {
            return Err(ReconcileError::config(format!(
                "connection '{}' pool_size must be at least 1",
                self.name
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ReconcileError::config(format!(
                "connection '{}' connect_timeout_ms must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// Names of the queue record fields the classifier reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueFields {
    pub id: String,
    pub status: String,
    pub payload: String,
}

impl Default for QueueFields {
    fn default() -> Self {
        Self {
            id: DEFAULT_QUEUE_ID_FIELD.to_string(),
            status: DEFAULT_QUEUE_STATUS_FIELD.to_string(),
            payload: DEFAULT_QUEUE_PAYLOAD_FIELD.to_string(),
        }
    }
}

impl QueueFields {
    fn validate(&self) -> ReconcileResult<()> {
        for (role, name) in [
            ("id", &self.id),
            ("status", &self.status),
            ("payload", &self.payload),
        ] {
            if name.trim().is_empty() {
                return Err(ReconcileError::config(format!(
                    "queue {} field name must not be empty",
                    role
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter, e.g. `info` or `recovery_sync=debug`; `RUST_LOG` wins
    pub level: String,
    pub include_timestamp: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            include_timestamp: true,
        }
    }
}

impl LoggingSettings {
    /// Parses the configured level as a plain level name.
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        log::LevelFilter::from_str(self.level.trim()).ok()
    }

    fn validate(&self) -> ReconcileResult<()> {
        if self.level.trim().is_empty() {
            return Err(ReconcileError::config("logging level must not be empty"));
        }
        // Directive strings such as `recovery_sync=debug` are checked by env_logger itself.
        if !self.level.contains('=') && self.level_filter().is_none() {
            return Err(ReconcileError::config(format!(
                "unknown logging level '{}'",
                self.level
            )));
        }
        Ok(())
    }
}
