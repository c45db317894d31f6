//! IRA Chaos Engineering (ira-chaos)
//!
//! Timed fault experiments against agent replicas and external
//! dependencies, plus a network partition simulator that isolates a subset
//! of agents, tracks the inconsistencies that accumulate while they are cut
//! off, and reconciles them on heal.
//!
//! ## Invariants
//!
//! - every fault is reverted when its window closes or it is stopped
//! - one experiment per component at a time
//! - an experiment whose target is still unhealthy at
//!   `ceiling_multiplier × duration` is escalated, never silently recovered
//! - a healed partition leaves no work undelivered; anything unplaceable
//!   escalates the partition instead
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ira_chaos::prelude::*;
//!
//! let partitions = Arc::new(NetworkPartitionSimulator::new(Arc::clone(&scaling)));
//! let chaos = Arc::new(ChaosInjector::new(ChaosConfig::default(), scaling, breakers, partitions));
//!
//! let exp = chaos.inject(FaultType::DatabaseFailure, "postgres", 60, 0.5)?;
//! // ... later
//! let report = chaos.evaluate_recovery(&exp.experiment_id)?;
//! ```

pub mod config;
pub mod error;
pub mod injector;
pub mod partition;
pub mod types;

pub use config::ChaosConfig;
pub use error::{ChaosError, PartitionError};
pub use injector::{resilience_score, ChaosInjector};
pub use partition::NetworkPartitionSimulator;
pub use types::{
    impact, ChaosDashboard, ChaosExperiment, ConsistencyIssue, DispatchOutcome, ExperimentId, ExperimentStatus,
    FaultType, IssueKind, NetworkPartitionSimulation, PartitionId, PartitionStatus, RecoveryAction, RecoveryReport,
};

/// Common imports
pub mod prelude {
    pub use crate::config::ChaosConfig;
    pub use crate::error::{ChaosError, PartitionError};
    pub use crate::injector::ChaosInjector;
    pub use crate::partition::NetworkPartitionSimulator;
    pub use crate::types::{
        ChaosExperiment, DispatchOutcome, ExperimentId, ExperimentStatus, FaultType, PartitionId, PartitionStatus,
    };
}
