//! IRA Resilience Core (ira-core)
//!
//! Wires the event store, circuit breakers, replica pools and chaos tooling
//! into one [`ResilienceCore`] service object and runs the incident control
//! flow across them:
//!
//! ```text
//! incident ─▶ record + select replica ─▶ breaker("agent:<type>") ─▶ executor
//!                                                    │
//!                         event store ◀── outcome ◀──┘
//! ```
//!
//! Errors from every component surface as [`CoreError`], classified by
//! [`ErrorKind`] so callers can tell "no capacity", "dependency refused" and
//! "needs a human" apart.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ira_core::prelude::*;
//!
//! let core = ResilienceCore::new(CoreConfig::load("ira.toml")?, Arc::new(InMemoryProvisioner::new()))?;
//! core.start();
//!
//! let incident = Incident::new("inc-42", "checkout latency", AgentType::Detection);
//! let report = core.handle_incident(&incident, &executor).await?;
//!
//! core.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod incident;
pub mod service;

pub use config::CoreConfig;
pub use error::{ConfigError, CoreError, ErrorKind};
pub use incident::{AgentExecutor, AgentOutcome, ExecutionError, Incident, IncidentReport, SeededExecutor};
pub use service::{agent_dependency, CoreStatus, ResilienceCore};

/// Common imports
pub mod prelude {
    pub use crate::config::CoreConfig;
    pub use crate::error::{CoreError, ErrorKind};
    pub use crate::incident::{AgentExecutor, AgentOutcome, ExecutionError, Incident, IncidentReport};
    pub use crate::service::{CoreStatus, ResilienceCore};
    pub use ira_chaos::{ExperimentStatus, FaultType};
    pub use ira_events::{EventStore, IncidentId, IncidentState};
    pub use ira_scaling::{AgentType, InMemoryProvisioner, ReplicaId, Severity};
    pub use std::sync::Arc;
}
