//! Breaker configuration

use crate::error::InvalidBreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the window that trip the breaker
    pub failure_threshold: u32,
    /// Rolling window for counting failures, in seconds
    pub failure_window_secs: u64,
    /// Time spent open before a half-open probe, in seconds
    pub cooldown_secs: u64,
    /// Bound on every wrapped call, probes included, in milliseconds
    pub call_timeout_ms: u64,
    /// Background tick period, in milliseconds
    pub tick_interval_ms: u64,
}

impl BreakerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With failure threshold
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// With rolling failure window
    #[inline]
    #[must_use]
    pub fn with_failure_window_secs(mut self, secs: u64) -> Self {
        self.failure_window_secs = secs;
        self
    }

    /// With open-state cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// With call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    /// Rolling window as a duration
    #[inline]
    #[must_use]
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    /// Cooldown as a duration
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Call timeout as a duration
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Tick period as a duration
    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// The first field that is out of range.
    pub fn validate(&self) -> Result<(), InvalidBreakerConfig> {
        let check = |ok: bool, field, requirement| {
            if ok {
                Ok(())
            } else {
                Err(InvalidBreakerConfig { field, requirement })
            }
        };
        check(self.failure_threshold > 0, "failure_threshold", "must be at least 1")?;
        check(self.failure_window_secs > 0, "failure_window_secs", "must be positive")?;
        check(self.call_timeout_ms > 0, "call_timeout_ms", "must be positive")?;
        check(self.tick_interval_ms > 0, "tick_interval_ms", "must be positive")
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 60,
            cooldown_secs: 30,
            call_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
        }
    }
}
