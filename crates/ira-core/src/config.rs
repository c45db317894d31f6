//! Core configuration
//!
//! One TOML document with a table per component:
//!
//! ```toml
//! append_attempts = 5
//!
//! [events]
//! snapshot_every = 50
//!
//! [breaker]
//! failure_threshold = 5
//! cooldown_secs = 30
//!
//! [scaling]
//! regions = ["us-east-1", "eu-west-1"]
//!
//! [scaling.policies.detection]
//! min_replicas = 2
//! max_replicas = 10
//!
//! [chaos]
//! ceiling_multiplier = 3
//! ```
//!
//! Omitted tables and fields take their defaults.

use crate::error::ConfigError;
use ira_breaker::BreakerConfig;
use ira_chaos::ChaosConfig;
use ira_events::EventStoreConfig;
use ira_scaling::ScalingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for every component of the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Attempts for each optimistic event append
    pub append_attempts: u32,
    /// Event store
    pub events: EventStoreConfig,
    /// Default breaker settings for every dependency
    pub breaker: BreakerConfig,
    /// Replica pools
    pub scaling: ScalingConfig,
    /// Chaos injector
    pub chaos: ChaosConfig,
}

impl CoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With event store settings
    #[inline]
    #[must_use]
    pub fn with_events(mut self, events: EventStoreConfig) -> Self {
        self.events = events;
        self
    }

    /// With breaker defaults
    #[inline]
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// With scaling settings
    #[inline]
    #[must_use]
    pub fn with_scaling(mut self, scaling: ScalingConfig) -> Self {
        self.scaling = scaling;
        self
    }

    /// With chaos settings
    #[inline]
    #[must_use]
    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `Parse` for malformed TOML, otherwise whatever [`Self::validate`] rejects.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `Io` if the file cannot be read, then as [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every section
    ///
    /// # Errors
    /// The first section error found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.append_attempts == 0 {
            return Err(ConfigError::Invalid {
                section: "core",
                reason: "append_attempts must be at least 1".to_string(),
            });
        }
        if self.events.stream_buffer == 0 {
            return Err(ConfigError::Invalid {
                section: "events",
                reason: "stream_buffer must be positive".to_string(),
            });
        }
        if self.events.repair_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                section: "events",
                reason: "repair_timeout_ms must be positive".to_string(),
            });
        }
        self.breaker.validate()?;
        self.scaling.validate()?;
        self.chaos.validate()?;
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            append_attempts: 5,
            events: EventStoreConfig::default(),
            breaker: BreakerConfig::default(),
            scaling: ScalingConfig::default(),
            chaos: ChaosConfig::default(),
        }
    }
}
