//! Loads a [`SyncConfig`] from a file and the environment.

use super::SyncConfig;
use crate::constants::{DESTINATION_CONNECTION, ENV_PREFIX, SOURCE_CONNECTION};
use crate::error::{ReconcileError, ReconcileResult};
use std::path::Path;

/// Builds the effective configuration: file (or defaults), then environment
/// overrides, then validation.
#[derive(Debug, Clone)]
pub struct SyncConfigLoader {
    env_prefix: String,
}

impl Default for SyncConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfigLoader {
    pub fn new() -> Self {
        Self {
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Uses a different environment variable prefix.
    pub fn with_env_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: prefix.into(),
        }
    }

    /// Loads the configuration file at `path`, or the defaults when `None`.
    ///
    /// Nothing is logged here: the logger is installed from the result.
    pub fn load(&self, path: Option<&Path>) -> ReconcileResult<SyncConfig> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => SyncConfig::default(),
        };

        self.apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Human-readable origin of a configuration, for the startup log line.
    pub fn describe_source(path: Option<&Path>) -> String {
        match path {
            Some(path) => format!("config file '{}'", path.display()),
            None => "built-in defaults".to_string(),
        }
    }

    /// Reads a TOML or JSON file, picked by extension.
    pub fn load_from_file(path: &Path) -> ReconcileResult<SyncConfig> {
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| {
                ReconcileError::config(format!("Failed to parse TOML config: {}", e))
            }),
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                ReconcileError::config(format!("Failed to parse JSON config: {}", e))
            }),
            _ => Err(ReconcileError::config(
                "Unsupported config file format (only JSON and TOML supported)",
            )),
        }
    }

    /// Applies `<PREFIX>_*` overrides, reading variables through `lookup`.
    ///
    /// A malformed value or an address for an unconfigured connection is a
    /// configuration error.
    pub fn apply_overrides<F>(&self, config: &mut SyncConfig, lookup: F) -> ReconcileResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |suffix: &str| format!("{}_{}", self.env_prefix, suffix);

        if let Some(val) = lookup(&key("PAGE_LIMIT")) {
            config.page_limit = val.parse::<usize>().map_err(|_| {
                ReconcileError::config(format!(
                    "{} must be a positive integer, got '{}'",
                    key("PAGE_LIMIT"),
                    val
                ))
            })?;
        }

        if let Some(level) = lookup(&key("LOG_LEVEL")) {
            config.logging.level = level;
        }

        for (suffix, name) in [
            ("SOURCE_ADDRESS", SOURCE_CONNECTION),
            ("DESTINATION_ADDRESS", DESTINATION_CONNECTION),
        ] {
            if let Some(address) = lookup(&key(suffix)) {
                let connection = config.connection_mut(name).ok_or_else(|| {
                    ReconcileError::config(format!(
                        "{} set but no connection named '{}' is configured",
                        key(suffix),
                        name
                    ))
                })?;
                connection.address = address;
            }
        }
        Ok(())
    }
}
