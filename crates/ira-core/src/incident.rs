//! Incidents and the agent executor seam

use async_trait::async_trait;
use ira_events::IncidentId;
use ira_scaling::{AgentReplica, AgentType, ReplicaId, Severity, WorkId};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One unit of incident-handling work for one agent type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident
    pub incident_id: IncidentId,
    /// Short description
    pub title: String,
    /// Severity
    pub severity: Severity,
    /// Agent type that should handle this phase
    pub agent_type: AgentType,
    /// Region the incident originated in
    pub region: Option<String>,
}

impl Incident {
    /// Create incident with medium severity and no region
    #[must_use]
    pub fn new(incident_id: impl Into<IncidentId>, title: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            incident_id: incident_id.into(),
            title: title.into(),
            severity: Severity::default(),
            agent_type,
            region: None,
        }
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// With originating region
    #[inline]
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Work item identity for this phase
    #[must_use]
    pub fn work_id(&self) -> WorkId {
        WorkId::from(format!("{}:{}", self.incident_id, self.agent_type))
    }
}

/// What an agent reported back
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Free-form summary
    pub summary: String,
    /// Set when this phase closes the incident
    pub resolution: Option<String>,
}

impl AgentOutcome {
    /// Outcome with a summary only
    #[must_use]
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            resolution: None,
        }
    }

    /// Outcome that resolves the incident
    #[must_use]
    pub fn resolved(summary: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            resolution: Some(resolution.into()),
        }
    }
}

/// Agent reported failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent execution failed: {reason}")]
pub struct ExecutionError {
    /// Reason given by the agent
    pub reason: String,
}

impl ExecutionError {
    /// Create execution error
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Performs the actual reasoning or action work on a replica
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run `incident` on `replica`
    async fn execute(&self, replica: &AgentReplica, incident: &Incident) -> Result<AgentOutcome, ExecutionError>;
}

/// Result of routing one incident phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    /// Incident
    pub incident_id: IncidentId,
    /// Replica that handled it
    pub replica_id: ReplicaId,
    /// What the agent reported
    pub outcome: AgentOutcome,
    /// Event chain version after the outcome was recorded
    pub version: u64,
}

/// Executor with seeded, reproducible outcomes
///
/// Fails with probability `failure_rate` and resolves incidents on the
/// resolution phase. Used by `ira simulate`.
#[derive(Debug)]
pub struct SeededExecutor {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    latency: Duration,
}

impl SeededExecutor {
    /// Create executor
    #[must_use]
    pub fn new(seed: u64, failure_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency: Duration::ZERO,
        }
    }

    /// With simulated work time
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl AgentExecutor for SeededExecutor {
    async fn execute(&self, replica: &AgentReplica, incident: &Incident) -> Result<AgentOutcome, ExecutionError> {
        let roll: f64 = self.rng.lock().random();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if roll < self.failure_rate {
            return Err(ExecutionError::new(format!("{} gave up on {}", replica.replica_id, incident.incident_id)));
        }
        let summary = format!("{} handled by {}", incident.agent_type, replica.replica_id);
        if incident.agent_type == AgentType::Resolution {
            Ok(AgentOutcome::resolved(summary, "remediation applied"))
        } else {
            Ok(AgentOutcome::summary(summary))
        }
    }
}
