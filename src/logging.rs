// src/logging.rs

//! tracing subscriber setup for applications embedding the queue

use crate::config::LoggingConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to config
///
/// Returns false when a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    let default_level = if config.debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
