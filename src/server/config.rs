//! Intent server configuration.

use crate::core::{Error, Result};
use crate::monitoring::LoggerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Intent server configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentServerConfig {
    /// How long the disambiguation listener may take to decide (ms)
    pub disambiguation_timeout_ms: u64,
    /// How long a handling application may take to start (ms)
    pub start_application_timeout_ms: u64,
    /// How long a handling application may take to reply (ms)
    pub reply_timeout_ms: u64,
    /// Logging configuration
    pub logging: LoggerConfig,
}

impl Default for IntentServerConfig {
    fn default() -> Self {
        Self {
            disambiguation_timeout_ms: 10_000,
            start_application_timeout_ms: 3_000,
            reply_timeout_ms: 5_000,
            logging: LoggerConfig::default(),
        }
    }
}

impl IntentServerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check that every timeout is positive.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("disambiguation_timeout_ms", self.disambiguation_timeout_ms),
            ("start_application_timeout_ms", self.start_application_timeout_ms),
            ("reply_timeout_ms", self.reply_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    /// Disambiguation timeout as a `Duration`.
    pub fn disambiguation_timeout(&self) -> Duration {
        Duration::from_millis(self.disambiguation_timeout_ms)
    }

    /// Handler start timeout as a `Duration`.
    pub fn start_application_timeout(&self) -> Duration {
        Duration::from_millis(self.start_application_timeout_ms)
    }

    /// Handler reply timeout as a `Duration`.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Convert a timeout setting to milliseconds, rejecting zero.
pub(crate) fn timeout_millis(name: &str, timeout: Duration) -> Result<u64> {
    match u64::try_from(timeout.as_millis()) {
        Ok(0) => Err(Error::InvalidConfig(format!("{name} must be greater than 0"))),
        Ok(ms) => Ok(ms),
        Err(_) => Err(Error::InvalidConfig(format!("{name} is too large"))),
    }
}
