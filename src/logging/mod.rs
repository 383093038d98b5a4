//! Logging setup.
//!
//! All diagnostic output goes through the `log` macros; this installs
//! `env_logger` as the backend. The configured level is the default filter
//! and `RUST_LOG`, when set, takes precedence.

use crate::config::LoggingSettings;
use env_logger::{Builder, Env};

/// Installs the global logger. Calling it again is a no-op.
pub fn init(settings: &LoggingSettings) {
    let env = Env::default().default_filter_or(settings.level.as_str());
    let mut builder = Builder::from_env(env);
    if !settings.include_timestamp {
        builder.format_timestamp(None);
    }
    // Already initialised (tests, embedding callers): keep the existing logger.
    builder.try_init().ok();
}

/// Logger for tests: captured output, debug level.
pub fn init_for_tests() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}
