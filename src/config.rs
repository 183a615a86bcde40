// src/config.rs

//! Configuration file parsing for the emerge queue
//!
//! Supports TOML configuration files with the following sections:
//! - [emerge] - Command vector and option flags handed to emerge
//! - [emerge.env] - Extra environment for every spawned process
//! - [monitor] - Title polling cadence of running jobs
//! - [logging] - Log verbosity

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub emerge: EmergeCommands,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl QueueConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: QueueConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.emerge.command.is_empty() {
            return Err(Error::Config("emerge.command must not be empty".to_string()));
        }
        if self.emerge.sync_command.trim().is_empty() {
            return Err(Error::Config("emerge.sync_command must not be empty".to_string()));
        }
        if self.monitor.title_poll_ms == 0 {
            return Err(Error::Config("monitor.title_poll_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Command vectors and flags used to build emerge invocations
#[derive(Debug, Clone, Deserialize)]
pub struct EmergeCommands {
    /// Program and leading arguments (default: ["/usr/bin/emerge"])
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    #[serde(default = "default_unmerge_flag")]
    pub unmerge_flag: String,

    /// Flags added unless a job is forced (dry run)
    #[serde(default = "default_pretend_flags")]
    pub pretend_flags: Vec<String>,

    #[serde(default = "default_oneshot_flag")]
    pub oneshot_flag: String,

    #[serde(default = "default_newuse_flag")]
    pub newuse_flag: String,

    #[serde(default = "default_deep_flag")]
    pub deep_flag: String,

    #[serde(default = "default_update_flag")]
    pub update_flag: String,

    /// Sync command line; `&&` separates commands run in sequence
    #[serde(default = "default_sync_command")]
    pub sync_command: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for EmergeCommands {
    fn default() -> Self {
        Self {
            command: default_command(),
            unmerge_flag: default_unmerge_flag(),
            pretend_flags: default_pretend_flags(),
            oneshot_flag: default_oneshot_flag(),
            newuse_flag: default_newuse_flag(),
            deep_flag: default_deep_flag(),
            update_flag: default_update_flag(),
            sync_command: default_sync_command(),
            env: BTreeMap::new(),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["/usr/bin/emerge".to_string()]
}

fn default_unmerge_flag() -> String {
    "--unmerge".to_string()
}

fn default_pretend_flags() -> Vec<String> {
    vec!["--pretend".to_string(), "--verbose".to_string()]
}

fn default_oneshot_flag() -> String {
    "--oneshot".to_string()
}

fn default_newuse_flag() -> String {
    "--newuse".to_string()
}

fn default_deep_flag() -> String {
    "--deep".to_string()
}

fn default_update_flag() -> String {
    "--update".to_string()
}

fn default_sync_command() -> String {
    "emerge --sync".to_string()
}

/// Monitoring of running jobs
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between terminal title polls in milliseconds
    #[serde(default = "default_title_poll_ms")]
    pub title_poll_ms: u64,
}

impl MonitorConfig {
    pub fn title_poll(&self) -> Duration {
        Duration::from_millis(self.title_poll_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            title_poll_ms: default_title_poll_ms(),
        }
    }
}

fn default_title_poll_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log at debug level instead of info
    #[serde(default)]
    pub debug: bool,
}
