//! Error types for experiments and partitions

use crate::types::{ExperimentId, FaultType, PartitionId};
use ira_scaling::{ReplicaId, ScalingError};

/// Partition simulator error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PartitionError {
    /// No agents named
    #[error("a partition needs at least one affected agent")]
    EmptyPartition,

    /// Zero-length partition
    #[error("partition duration must be positive")]
    InvalidDuration,

    /// Agent not in the replica registry
    #[error("unknown agent {0}")]
    UnknownReplica(ReplicaId),

    /// Agent already cut off by another partition
    #[error("agent {replica_id} is already isolated by {partition_id}")]
    AlreadyIsolated {
        /// Agent
        replica_id: ReplicaId,
        /// Partition holding it
        partition_id: PartitionId,
    },

    /// Unknown partition
    #[error("unknown partition {0}")]
    UnknownPartition(PartitionId),

    /// Reconciliation left work unplaced; the partition is escalated
    #[error("partition {partition_id} could not heal: {unresolved} work items unresolved")]
    HealingFailed {
        /// Partition
        partition_id: PartitionId,
        /// Work items neither redelivered nor rerouted
        unresolved: usize,
    },

    /// Replica registry rejected an operation
    #[error(transparent)]
    Scaling(#[from] ScalingError),
}

/// Fault injector error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChaosError {
    /// Duration or intensity out of range
    #[error("invalid experiment: {0}")]
    InvalidExperiment(String),

    /// Target is not a replica, peer group or dependency
    #[error("unknown target {0}")]
    UnknownTarget(String),

    /// Fault cannot be applied to this kind of target
    #[error("{fault_type} cannot target {target}")]
    IncompatibleTarget {
        /// Requested fault
        fault_type: FaultType,
        /// Target component
        target: String,
    },

    /// Target already under an active experiment
    #[error("{target} is already under experiment {experiment_id}")]
    TargetBusy {
        /// Target component
        target: String,
        /// Experiment holding it
        experiment_id: ExperimentId,
    },

    /// Active experiment limit reached
    #[error("at most {limit} experiments may run at once")]
    TooManyActive {
        /// Configured limit
        limit: usize,
    },

    /// Unknown experiment
    #[error("unknown experiment {0}")]
    UnknownExperiment(ExperimentId),

    /// Configuration violates its invariants
    #[error("invalid chaos config: {0}")]
    InvalidConfig(String),

    /// Partition simulator failure
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Replica registry failure
    #[error(transparent)]
    Scaling(#[from] ScalingError),
}

impl ChaosError {
    /// Caller supplied a bad request
    #[inline]
    #[must_use]
    pub fn is_rejected_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidExperiment(_)
                | Self::UnknownTarget(_)
                | Self::IncompatibleTarget { .. }
                | Self::TargetBusy { .. }
                | Self::TooManyActive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_target_is_a_rejected_request() {
        let err = ChaosError::TargetBusy {
            target: "postgres".to_string(),
            experiment_id: ExperimentId::from("exp-1"),
        };
        assert!(err.is_rejected_request());
        assert!(err.to_string().contains("exp-1"));
        assert!(!ChaosError::UnknownExperiment(ExperimentId::from("x")).is_rejected_request());
    }

    #[test]
    fn healing_failure_reports_unresolved_count() {
        let err = PartitionError::HealingFailed {
            partition_id: PartitionId::from("part-1"),
            unresolved: 2,
        };
        assert_eq!(err.to_string(), "partition part-1 could not heal: 2 work items unresolved");
    }
}
