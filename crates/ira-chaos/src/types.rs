//! Experiment and partition records

use chrono::{DateTime, Utc};
use ira_scaling::{ReplicaId, WorkId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh ID
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), Ulid::new().to_string().to_lowercase()))
            }

            /// Borrow as str
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Chaos experiment identifier
    ExperimentId,
    "exp"
);
string_id!(
    /// Network partition identifier
    PartitionId,
    "part"
);

/// Kind of injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Replica marked unhealthy with a simulated error rate
    AgentFailure,
    /// Replicas cut off from the rest of the fleet
    NetworkPartition,
    /// Dependency calls hang past the breaker's call timeout
    ServiceTimeout,
    /// Replica degraded, performance reduced
    MemoryPressure,
    /// Replica degraded, performance reduced
    CpuOverload,
    /// Dependency calls fail
    DatabaseFailure,
    /// Dependency calls fail
    ExternalApiFailure,
}

impl FaultType {
    /// Every fault type
    pub const ALL: [Self; 7] = [
        Self::AgentFailure,
        Self::NetworkPartition,
        Self::ServiceTimeout,
        Self::MemoryPressure,
        Self::CpuOverload,
        Self::DatabaseFailure,
        Self::ExternalApiFailure,
    ];

    /// Snake-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentFailure => "agent_failure",
            Self::NetworkPartition => "network_partition",
            Self::ServiceTimeout => "service_timeout",
            Self::MemoryPressure => "memory_pressure",
            Self::CpuOverload => "cpu_overload",
            Self::DatabaseFailure => "database_failure",
            Self::ExternalApiFailure => "external_api_failure",
        }
    }

    /// Applied through a circuit breaker rather than a replica
    #[must_use]
    pub const fn targets_dependency(self) -> bool {
        matches!(
            self,
            Self::ServiceTimeout | Self::DatabaseFailure | Self::ExternalApiFailure
        )
    }
}

impl std::fmt::Display for FaultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown fault type: {s}"))
    }
}

/// Experiment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Fault applied
    Active,
    /// Fault reverted, waiting for the target to return to baseline
    Recovering,
    /// Target back at baseline
    Recovered,
    /// Target did not recover before the ceiling; needs an operator
    Escalated,
}

impl ExperimentStatus {
    /// No further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Recovered | Self::Escalated)
    }
}

/// Impact metric names
pub mod impact {
    /// Fraction of affected requests that failed
    pub const ERROR_RATE: &str = "error_rate";
    /// Seconds from injection to the fault being observable
    pub const TIME_TO_DETECT_SECS: &str = "time_to_detect_secs";
    /// Seconds from revert to baseline health
    pub const TIME_TO_RECOVER_SECS: &str = "time_to_recover_secs";
    /// Replicas or dependencies touched
    pub const AFFECTED_COMPONENTS: &str = "affected_components";
    /// Calls refused by an open breaker during the experiment
    pub const REJECTED_CALLS: &str = "rejected_calls";
}

/// A deliberately injected fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosExperiment {
    /// Identifier
    pub experiment_id: ExperimentId,
    /// Fault kind
    pub fault_type: FaultType,
    /// Replica, peer group or dependency name
    pub target_component: String,
    /// Fault window
    pub duration_seconds: u64,
    /// Fraction of requests/capacity affected
    pub intensity: f64,
    /// Injection time
    pub start_time: DateTime<Utc>,
    /// Set once recovered or escalated
    pub end_time: Option<DateTime<Utc>>,
    /// Target returned to baseline
    pub recovery_observed: bool,
    /// Lifecycle
    pub status: ExperimentStatus,
    /// Escalation seen by an operator
    pub acknowledged: bool,
    /// Partition backing a `network_partition` experiment
    pub partition_id: Option<PartitionId>,
    /// Named impact measurements, see [`impact`]
    pub impact_metrics: BTreeMap<String, f64>,
}

/// Result of [`crate::ChaosInjector::evaluate_recovery`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Experiment
    pub experiment_id: ExperimentId,
    /// Lifecycle at evaluation
    pub status: ExperimentStatus,
    /// Target currently at baseline
    pub target_healthy: bool,
    /// Recovery recorded
    pub recovery_observed: bool,
    /// Impact so far
    pub impact_metrics: BTreeMap<String, f64>,
    /// Evaluation time
    pub evaluated_at: DateTime<Utc>,
}

/// Injector overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosDashboard {
    /// Experiments holding or recovering from a fault
    pub active: Vec<ChaosExperiment>,
    /// Recovered or escalated experiments
    pub completed: Vec<ChaosExperiment>,
    /// Escalations not yet acknowledged
    pub escalated_count: usize,
    /// Unhealthy or isolated replicas plus open breakers
    pub unhealthy_components: usize,
    /// 0.0–1.0, penalized by active experiments, unhealthy components and escalations
    pub resilience_score: f64,
}

/// Partition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Agents isolated
    Active,
    /// Agents reconnected and state reconciled
    Healed,
    /// Reconciliation left work unplaced
    Escalated,
}

/// Kind of divergence between the two sides of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Work held by an isolated agent, invisible to the majority
    OrphanedAssignment,
    /// Work sent to an isolated agent
    UndeliverableAssignment,
    /// Same work held on both sides
    ConflictingAssignment,
}

/// One detected divergence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    /// Kind
    pub kind: IssueKind,
    /// Isolated agent involved
    pub replica_id: ReplicaId,
    /// Work item involved
    pub work_id: WorkId,
    /// Majority-side holder, for conflicts
    pub counterpart: Option<ReplicaId>,
    /// Detection time
    pub detected_at: DateTime<Utc>,
}

impl ConsistencyIssue {
    pub(crate) fn same_divergence(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.replica_id == other.replica_id
            && self.work_id == other.work_id
            && self.counterpart == other.counterpart
    }
}

/// One reconciliation step taken while healing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Agent reachable again
    Reconnected {
        /// Agent
        replica_id: ReplicaId,
    },
    /// Orphaned work kept by the agent that held it
    Reclaimed {
        /// Work item
        work_id: WorkId,
        /// Holder
        replica_id: ReplicaId,
    },
    /// Conflict settled by keeping the newer assignment
    ConflictResolved {
        /// Work item
        work_id: WorkId,
        /// Holder kept
        kept: ReplicaId,
        /// Holder released
        released: ReplicaId,
    },
    /// Undeliverable work handed to its original target
    Redelivered {
        /// Work item
        work_id: WorkId,
        /// Target
        replica_id: ReplicaId,
    },
    /// Undeliverable work placed on another replica
    Rerouted {
        /// Work item
        work_id: WorkId,
        /// Original target
        from: ReplicaId,
        /// New holder
        to: ReplicaId,
    },
    /// Undeliverable work dropped because the majority picked it up meanwhile
    Superseded {
        /// Work item
        work_id: WorkId,
        /// Current holder
        holder: ReplicaId,
    },
}

/// A simulated split between a subset of agents and the rest of the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPartitionSimulation {
    /// Identifier
    pub partition_id: PartitionId,
    /// Isolated agents
    pub affected_agents: BTreeSet<ReplicaId>,
    /// Start time
    pub partition_start: DateTime<Utc>,
    /// Self-heal deadline, in seconds from start
    pub partition_duration_seconds: u64,
    /// Reconciliation started and not yet finished
    pub healing_in_progress: bool,
    /// Lifecycle
    pub status: PartitionStatus,
    /// Divergences detected so far
    pub state_consistency_issues: Vec<ConsistencyIssue>,
    /// Reconciliation steps taken
    pub recovery_actions: Vec<RecoveryAction>,
    /// Set once healed
    pub healed_at: Option<DateTime<Utc>>,
}

/// Result of [`crate::NetworkPartitionSimulator::dispatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Assigned; carries the replica's new load
    Delivered {
        /// Load after assignment
        load: u32,
    },
    /// Target isolated; recorded as a consistency issue
    Undeliverable {
        /// Partition isolating the target
        partition_id: PartitionId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_type_names_round_trip() {
        for t in FaultType::ALL {
            assert_eq!(t.as_str().parse::<FaultType>().unwrap(), t);
        }
        assert!("meteor_strike".parse::<FaultType>().is_err());
    }

    #[test]
    fn dependency_faults() {
        assert!(FaultType::DatabaseFailure.targets_dependency());
        assert!(FaultType::ServiceTimeout.targets_dependency());
        assert!(!FaultType::AgentFailure.targets_dependency());
        assert!(!FaultType::NetworkPartition.targets_dependency());
    }

    #[test]
    fn generated_ids_are_prefixed() {
        assert!(ExperimentId::generate().as_str().starts_with("exp-"));
        assert!(PartitionId::generate().as_str().starts_with("part-"));
    }

    #[test]
    fn recovery_actions_are_tagged() {
        let action = RecoveryAction::Reconnected {
            replica_id: ReplicaId::from("a1"),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "reconnected");
        assert_eq!(json["replica_id"], "a1");
    }
}
