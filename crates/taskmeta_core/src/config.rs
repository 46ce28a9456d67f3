//! Core configuration.
//!
//! Hosts either build these structs directly or ship a JSON settings blob;
//! every field has a built-in default so partial JSON is accepted.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Pause between a boot/refresh trigger and the alarm rescan.
pub const DEFAULT_STARTUP_DELAY_MS: u64 = 5_000;
/// List type used for the remote roster when none is configured.
pub const DEFAULT_LIST_TYPE: &str = "remote_list";

/// Scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub startup_delay_ms: u64,
}

impl SchedulerConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: DEFAULT_STARTUP_DELAY_MS,
        }
    }
}

/// Remote roster settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// Discriminator stored with every mirrored list.
    pub list_type: String,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            list_type: DEFAULT_LIST_TYPE.to_string(),
        }
    }
}

/// Top-level configuration for the core services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub roster: RosterConfig,
}

impl CoreConfig {
    /// Parses configuration from JSON and validates it.
    ///
    /// # Errors
    /// - `Parse` for malformed JSON or wrong field types.
    /// - `Invalid` when a value is outside its allowed range.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roster.list_type.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "roster.list_type",
                message: "must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration loading error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid configuration json: {message}"),
            Self::Invalid { field, message } => write!(f, "invalid `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {}
