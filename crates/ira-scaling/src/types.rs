//! Core types for replica pools
//!
//! - [`AgentType`]: the closed set of agent specializations
//! - [`AgentReplica`]: point-in-time view of one replica
//! - [`WorkItem`]: what the router needs to know about a unit of work
//! - [`ScalingAction`] / [`ScalingMetrics`]: autoscaler outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use ulid::Ulid;

/// Agent specialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Detects anomalies
    Detection,
    /// Finds root causes
    Diagnosis,
    /// Forecasts impact
    Prediction,
    /// Applies remediations
    Resolution,
    /// Notifies stakeholders
    Communication,
}

impl AgentType {
    /// Every agent type, in pipeline order
    pub const ALL: [Self; 5] = [
        Self::Detection,
        Self::Diagnosis,
        Self::Prediction,
        Self::Resolution,
        Self::Communication,
    ];

    /// Snake-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Diagnosis => "diagnosis",
            Self::Prediction => "prediction",
            Self::Resolution => "resolution",
            Self::Communication => "communication",
        }
    }

    /// Concurrent work items one replica of this type can hold
    #[must_use]
    pub const fn max_capacity(self) -> u32 {
        match self {
            Self::Detection => 10,
            Self::Diagnosis | Self::Prediction => 5,
            Self::Resolution => 3,
            Self::Communication => 20,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}

/// Replica identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    /// Generate `{agent_type}-{region}-{ulid}`
    #[must_use]
    pub fn generate(agent_type: AgentType, region: &str) -> Self {
        Self(format!("{agent_type}-{region}-{}", Ulid::new().to_string().to_lowercase()))
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReplicaId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit-of-work identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub String);

impl WorkId {
    /// Generate new work ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for WorkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replica health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    /// Fully serviceable
    #[default]
    Healthy,
    /// Serviceable with reduced performance
    Degraded,
    /// Never selected
    Unhealthy,
}

/// Incident severity as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    #[default]
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// High and critical work gets the best-performing replica
    #[inline]
    #[must_use]
    pub fn is_high(self) -> bool {
        self >= Self::High
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A unit of work to route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Work identifier
    pub work_id: WorkId,
    /// Preferred region, if any
    pub region: Option<String>,
    /// Severity
    pub severity: Severity,
}

impl WorkItem {
    /// Create a medium-severity item with no region preference
    #[must_use]
    pub fn new(work_id: impl Into<WorkId>) -> Self {
        Self {
            work_id: work_id.into(),
            region: None,
            severity: Severity::default(),
        }
    }

    /// With preferred region
    #[inline]
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Point-in-time view of one replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReplica {
    /// Unique ID
    pub replica_id: ReplicaId,
    /// Agent type
    pub agent_type: AgentType,
    /// Region
    pub region: String,
    /// Health
    pub status: ReplicaStatus,
    /// Work items currently held
    pub current_load: u32,
    /// Upper bound on `current_load`
    pub max_capacity: u32,
    /// 0.0–1.0
    pub performance_score: f64,
    /// Simulated error rate (set by fault injection)
    pub error_rate: f64,
    /// False while isolated by a network partition
    pub reachable: bool,
    /// Last health update
    pub last_health_check: DateTime<Utc>,
}

impl AgentReplica {
    /// Load as a fraction of capacity
    #[must_use]
    pub fn utilization(&self) -> f64 {
        f64::from(self.current_load) / f64::from(self.max_capacity.max(1))
    }
}

/// Why the autoscaler did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// Utilization between the thresholds
    WithinBand,
    /// Last action too recent
    Cooldown,
    /// Already at `max_replicas`
    AtMaxReplicas,
    /// Already at `min_replicas`
    AtMinReplicas,
    /// Low water not held for the full cooldown yet
    LowWaterNotSustained,
    /// Every candidate still holds work
    NoIdleReplicas,
}

/// Outcome of one autoscaler evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScalingAction {
    /// Replicas added
    ScaleUp {
        /// Agent type
        agent_type: AgentType,
        /// New replicas
        added: Vec<ReplicaId>,
    },
    /// Replicas removed
    ScaleDown {
        /// Agent type
        agent_type: AgentType,
        /// Removed replicas
        removed: Vec<ReplicaId>,
    },
    /// Nothing to do
    NoOp {
        /// Agent type
        agent_type: AgentType,
        /// Reason
        reason: NoOpReason,
    },
}

impl ScalingAction {
    /// Whether the pool changed
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp { .. })
    }
}

/// Fleet-wide scaling metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingMetrics {
    /// Incidents recorded in the rolling window, per minute
    pub incidents_per_minute: f64,
    /// Aggregate utilization per agent type
    pub utilization: BTreeMap<AgentType, f64>,
    /// Replica count per agent type
    pub replica_counts: BTreeMap<AgentType, usize>,
    /// Scale-up and scale-down actions taken
    pub scaling_actions: u64,
    /// Lifetime assignments per replica
    pub load_distribution: BTreeMap<ReplicaId, u64>,
    /// Smoothed latency per region, in milliseconds
    pub region_latency_ms: BTreeMap<String, f64>,
    /// Geographic routing fallbacks to another region
    pub failover_events: u64,
}
