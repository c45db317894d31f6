//! Error types for replica pools and provisioning

use crate::types::{AgentType, ReplicaId, WorkId};

/// Provisioning backend failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    /// Backend refused the request
    #[error("provisioning rejected in {region}: {reason}")]
    Rejected {
        /// Target region
        region: String,
        /// Backend message
        reason: String,
    },

    /// Single attempt exceeded its bound
    #[error("provisioning timed out after {after_ms}ms")]
    Timeout {
        /// Bound that elapsed
        after_ms: u64,
    },

    /// Every attempt failed
    #[error("provisioning {replica_id} failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Replica that was never created
        replica_id: ReplicaId,
        /// Attempts made
        attempts: u32,
        /// Last failure
        last: Box<ProvisionError>,
    },
}

/// Replica pool error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScalingError {
    /// Pool is empty or every replica is unhealthy or isolated
    #[error("no healthy replica available for {agent_type}")]
    NoHealthyReplica {
        /// Agent type requested
        agent_type: AgentType,
    },

    /// Replica is already holding `max_capacity` items
    #[error("replica {replica_id} is at capacity ({max_capacity})")]
    AtCapacity {
        /// Replica
        replica_id: ReplicaId,
        /// Its capacity
        max_capacity: u32,
    },

    /// Pool already has `max_replicas`
    #[error("{agent_type} pool is at its maximum of {max_replicas} replicas")]
    PoolAtMax {
        /// Agent type
        agent_type: AgentType,
        /// Policy bound
        max_replicas: u32,
    },

    /// Unknown replica
    #[error("unknown replica {0}")]
    UnknownReplica(ReplicaId),

    /// Replica ID already registered
    #[error("replica {0} already exists")]
    DuplicateReplica(ReplicaId),

    /// Replica is isolated by a partition
    #[error("replica {0} is unreachable")]
    ReplicaUnreachable(ReplicaId),

    /// Replica is being removed by scale-down
    #[error("replica {0} is draining")]
    ReplicaDraining(ReplicaId),

    /// Work already assigned to this replica
    #[error("work {work_id} already assigned to {replica_id}")]
    DuplicateAssignment {
        /// Replica
        replica_id: ReplicaId,
        /// Work item
        work_id: WorkId,
    },

    /// Release of work the replica does not hold
    #[error("work {work_id} is not assigned to {replica_id}")]
    UnknownWork {
        /// Replica
        replica_id: ReplicaId,
        /// Work item
        work_id: WorkId,
    },

    /// Policy or config violates its invariants
    #[error("invalid scaling policy: {0}")]
    InvalidPolicy(String),

    /// Provisioning failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl ScalingError {
    /// No capacity to route the work; the caller decides whether to queue or fail
    #[inline]
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::NoHealthyReplica { .. } | Self::AtCapacity { .. } | Self::PoolAtMax { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_classification() {
        let err = ScalingError::NoHealthyReplica {
            agent_type: AgentType::Resolution,
        };
        assert!(err.is_capacity());
        assert!(!ScalingError::UnknownReplica(ReplicaId::from("r")).is_capacity());
    }

    #[test]
    fn exhausted_mentions_last_failure() {
        let err = ProvisionError::Exhausted {
            replica_id: ReplicaId::from("r-1"),
            attempts: 3,
            last: Box::new(ProvisionError::Timeout { after_ms: 50 }),
        };
        assert!(err.to_string().contains("timed out after 50ms"));
    }
}
