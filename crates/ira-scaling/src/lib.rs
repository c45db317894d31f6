//! IRA Replica Scaling Service (ira-scaling)
//!
//! Keeps one pool of agent replicas per [`AgentType`], routes work to them
//! with a pluggable [`BalancingStrategy`], and resizes pools between
//! `min_replicas` and `max_replicas` based on aggregate utilization.
//!
//! ## Invariants
//!
//! - `0 ≤ current_load ≤ max_capacity` for every replica, under any interleaving
//! - unhealthy or isolated replicas are never selected
//! - a replica joins its pool only after provisioning succeeds
//! - scale-down removes only idle replicas
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ira_scaling::prelude::*;
//!
//! let svc = ReplicaScalingService::new(ScalingConfig::default(), Arc::new(InMemoryProvisioner::new()));
//! svc.create_replica(AgentType::Detection, "us-east-1").await?;
//!
//! let work = WorkItem::new("incident-42").with_severity(Severity::High);
//! let replica = svc.select_replica(AgentType::Detection, &work, StrategyKind::SeverityBased)?;
//! svc.assign(&replica.replica_id, &work.work_id)?;
//! ```

pub mod error;
pub mod policy;
pub mod provisioner;
mod replica;
pub mod service;
pub mod strategy;
pub mod types;

pub use error::{ProvisionError, ScalingError};
pub use policy::{ScalingConfig, ScalingPolicy};
pub use provisioner::{provision_with_retry, InMemoryProvisioner, ProvisionRequest, Provisioner};
pub use service::ReplicaScalingService;
pub use strategy::{BalancingStrategy, Geographic, LeastConnections, RoundRobin, Selection, SeverityBased, StrategyKind};
pub use types::{
    AgentReplica, AgentType, NoOpReason, ReplicaId, ReplicaStatus, ScalingAction, ScalingMetrics, Severity, WorkId,
    WorkItem,
};

/// Common imports
pub mod prelude {
    pub use crate::error::ScalingError;
    pub use crate::policy::{ScalingConfig, ScalingPolicy};
    pub use crate::provisioner::{InMemoryProvisioner, Provisioner};
    pub use crate::service::ReplicaScalingService;
    pub use crate::strategy::StrategyKind;
    pub use crate::types::{
        AgentReplica, AgentType, NoOpReason, ReplicaId, ReplicaStatus, ScalingAction, Severity, WorkId, WorkItem,
    };
}
