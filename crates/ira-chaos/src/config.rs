//! Injector configuration

use crate::error::ChaosError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chaos fault injector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfig {
    /// Hard ceiling on recovery, as a multiple of the experiment duration
    pub ceiling_multiplier: u32,
    /// Period between health observations, in milliseconds
    pub recovery_poll_ms: u64,
    /// Longest experiment accepted, in seconds
    pub max_duration_secs: u64,
    /// Experiments allowed to hold a fault at once
    pub max_active_experiments: usize,
}

impl ChaosConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With recovery ceiling multiplier
    #[inline]
    #[must_use]
    pub fn with_ceiling_multiplier(mut self, multiplier: u32) -> Self {
        self.ceiling_multiplier = multiplier;
        self
    }

    /// With observation period
    #[inline]
    #[must_use]
    pub fn with_recovery_poll_ms(mut self, ms: u64) -> Self {
        self.recovery_poll_ms = ms;
        self
    }

    /// With active experiment limit
    #[inline]
    #[must_use]
    pub fn with_max_active_experiments(mut self, limit: usize) -> Self {
        self.max_active_experiments = limit;
        self
    }

    /// Observation period
    #[inline]
    #[must_use]
    pub fn recovery_poll(&self) -> Duration {
        Duration::from_millis(self.recovery_poll_ms.max(1))
    }

    /// Check every bound is positive and the ceiling exceeds the window
    ///
    /// # Errors
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), ChaosError> {
        if self.ceiling_multiplier < 2 {
            return Err(ChaosError::InvalidConfig("ceiling_multiplier must be at least 2".to_string()));
        }
        if self.recovery_poll_ms == 0 {
            return Err(ChaosError::InvalidConfig("recovery_poll_ms must be positive".to_string()));
        }
        if self.max_duration_secs == 0 {
            return Err(ChaosError::InvalidConfig("max_duration_secs must be positive".to_string()));
        }
        if self.max_active_experiments == 0 {
            return Err(ChaosError::InvalidConfig("max_active_experiments must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            ceiling_multiplier: 3,
            recovery_poll_ms: 1_000,
            max_duration_secs: 3_600,
            max_active_experiments: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ChaosConfig::default().validate().is_ok());
    }

    #[test]
    fn ceiling_must_exceed_window() {
        let err = ChaosConfig::new().with_ceiling_multiplier(1).validate().unwrap_err();
        assert!(matches!(err, ChaosError::InvalidConfig(msg) if msg.contains("ceiling_multiplier")));
    }
}
