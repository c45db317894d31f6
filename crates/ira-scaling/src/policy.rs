//! Scaling policy and service configuration

use crate::error::ScalingError;
use crate::strategy::StrategyKind;
use crate::types::AgentType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-agent-type pool sizing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    /// Lower bound on pool size
    pub min_replicas: u32,
    /// Upper bound on pool size
    pub max_replicas: u32,
    /// Desired utilization (0–1)
    pub target_utilization: f64,
    /// Scale up at or above this utilization
    pub scale_up_threshold: f64,
    /// Scale down at or below this utilization
    pub scale_down_threshold: f64,
    /// Minimum time between scaling actions, in seconds
    pub cooldown_period: u64,
    /// Replicas added per scale-up
    pub scale_up_increment: u32,
    /// Replicas removed per scale-down
    pub scale_down_increment: u32,
}

impl ScalingPolicy {
    /// With replica bounds
    #[inline]
    #[must_use]
    pub fn with_replicas(mut self, min: u32, max: u32) -> Self {
        self.min_replicas = min;
        self.max_replicas = max;
        self
    }

    /// With utilization thresholds
    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, scale_down: f64, target: f64, scale_up: f64) -> Self {
        self.scale_down_threshold = scale_down;
        self.target_utilization = target;
        self.scale_up_threshold = scale_up;
        self
    }

    /// With cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_period = secs;
        self
    }

    /// With increments
    #[inline]
    #[must_use]
    pub fn with_increments(mut self, up: u32, down: u32) -> Self {
        self.scale_up_increment = up;
        self.scale_down_increment = down;
        self
    }

    /// Cooldown as a duration
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_period)
    }

    /// Check `min ≤ max` and `down < target < up`
    ///
    /// # Errors
    /// `InvalidPolicy` describing the first violation.
    pub fn validate(&self) -> Result<(), ScalingError> {
        if self.min_replicas > self.max_replicas {
            return Err(ScalingError::InvalidPolicy(format!(
                "min_replicas {} exceeds max_replicas {}",
                self.min_replicas, self.max_replicas
            )));
        }
        if self.max_replicas == 0 {
            return Err(ScalingError::InvalidPolicy("max_replicas must be at least 1".to_string()));
        }
        if !(self.scale_down_threshold < self.target_utilization
            && self.target_utilization < self.scale_up_threshold)
        {
            return Err(ScalingError::InvalidPolicy(format!(
                "thresholds must satisfy scale_down {} < target {} < scale_up {}",
                self.scale_down_threshold, self.target_utilization, self.scale_up_threshold
            )));
        }
        if self.scale_down_threshold < 0.0 || self.scale_up_threshold > 1.0 {
            return Err(ScalingError::InvalidPolicy("thresholds must lie within 0..=1".to_string()));
        }
        if self.scale_up_increment == 0 || self.scale_down_increment == 0 {
            return Err(ScalingError::InvalidPolicy("increments must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_replicas: 2,
            max_replicas: 10,
            target_utilization: 0.7,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown_period: 300,
            scale_up_increment: 1,
            scale_down_increment: 1,
        }
    }
}

/// Replica scaling service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Regions new replicas may be placed in
    pub regions: Vec<String>,
    /// Policy for agent types without an override
    pub default_policy: ScalingPolicy,
    /// Per-agent-type overrides
    pub policies: BTreeMap<AgentType, ScalingPolicy>,
    /// Strategy used when callers do not pick one
    pub default_strategy: StrategyKind,
    /// Bound on one provisioning attempt, in milliseconds
    pub provision_timeout_ms: u64,
    /// Provisioning attempts before giving up
    pub provision_attempts: u32,
    /// Linear backoff step between attempts, in milliseconds
    pub provision_backoff_ms: u64,
    /// Rolling window for incident throughput, in seconds
    pub incident_window_secs: u64,
    /// Smoothing factor for region latency (0 < alpha ≤ 1)
    pub latency_alpha: f64,
    /// Autoscaler evaluation period, in milliseconds
    pub autoscale_interval_ms: u64,
}

impl ScalingConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With placement regions
    #[must_use]
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    /// With a policy override for one agent type
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, agent_type: AgentType, policy: ScalingPolicy) -> Self {
        self.policies.insert(agent_type, policy);
        self
    }

    /// With provisioning retry settings
    #[inline]
    #[must_use]
    pub fn with_provisioning(mut self, attempts: u32, timeout_ms: u64, backoff_ms: u64) -> Self {
        self.provision_attempts = attempts;
        self.provision_timeout_ms = timeout_ms;
        self.provision_backoff_ms = backoff_ms;
        self
    }

    /// Policy in force for `agent_type`
    #[must_use]
    pub fn policy(&self, agent_type: AgentType) -> &ScalingPolicy {
        self.policies.get(&agent_type).unwrap_or(&self.default_policy)
    }

    /// Validate every policy and the service settings
    ///
    /// # Errors
    /// `InvalidPolicy` describing the first violation.
    pub fn validate(&self) -> Result<(), ScalingError> {
        if self.regions.is_empty() {
            return Err(ScalingError::InvalidPolicy("at least one region is required".to_string()));
        }
        if self.provision_attempts == 0 {
            return Err(ScalingError::InvalidPolicy("provision_attempts must be at least 1".to_string()));
        }
        if !(self.latency_alpha > 0.0 && self.latency_alpha <= 1.0) {
            return Err(ScalingError::InvalidPolicy("latency_alpha must lie in (0, 1]".to_string()));
        }
        if self.incident_window_secs == 0 {
            return Err(ScalingError::InvalidPolicy("incident_window_secs must be positive".to_string()));
        }
        self.default_policy.validate()?;
        for (agent_type, policy) in &self.policies {
            policy
                .validate()
                .map_err(|e| ScalingError::InvalidPolicy(format!("{agent_type}: {e}")))?;
        }
        Ok(())
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            regions: vec!["us-east-1".to_string(), "us-west-2".to_string(), "eu-west-1".to_string()],
            default_policy: ScalingPolicy::default(),
            policies: BTreeMap::new(),
            default_strategy: StrategyKind::LeastConnections,
            provision_timeout_ms: 30_000,
            provision_attempts: 3,
            provision_backoff_ms: 200,
            incident_window_secs: 60,
            latency_alpha: 0.3,
            autoscale_interval_ms: 15_000,
        }
    }
}
