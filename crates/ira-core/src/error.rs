//! Error types for the resilience core
//!
//! Every component error is carried unchanged inside [`CoreError`], and
//! [`CoreError::kind`] sorts it into the taxonomy upstream orchestration
//! routes on:
//! - capacity and fail-fast conditions go back to the immediate caller
//! - concurrency and dependency failures may be retried
//! - integrity and non-recovery conditions need an operator

use crate::incident::ExecutionError;
use ira_breaker::{BreakerError, InvalidBreakerConfig};
use ira_chaos::{ChaosError, PartitionError};
use ira_events::EventStoreError;
use ira_scaling::ScalingError;
use std::path::PathBuf;

/// Coarse classification of a [`CoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No replica can take the work
    Capacity,
    /// Optimistic-lock conflict on an event append
    Concurrency,
    /// Wrapped dependency call failed and was counted by its breaker
    Dependency,
    /// Breaker refused the call without invoking the dependency
    FailFast,
    /// Event chain failed verification or could not be repaired
    Integrity,
    /// Experiment or partition did not heal
    NonRecovery,
    /// Caller asked for something malformed
    InvalidRequest,
    /// Configuration rejected
    Configuration,
    /// Bookkeeping inconsistency
    Internal,
}

impl ErrorKind {
    /// Snake-case label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Concurrency => "concurrency",
            Self::Dependency => "dependency",
            Self::FailFast => "fail_fast",
            Self::Integrity => "integrity",
            Self::NonRecovery => "non_recovery",
            Self::InvalidRequest => "invalid_request",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Replica pool error
    #[error(transparent)]
    Scaling(#[from] ScalingError),

    /// Event store error
    #[error(transparent)]
    Events(#[from] EventStoreError),

    /// Circuit-protected agent call failed
    #[error(transparent)]
    Breaker(#[from] BreakerError<ExecutionError>),

    /// Chaos injector error
    #[error(transparent)]
    Chaos(#[from] ChaosError),

    /// Partition simulator error
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Classify for routing decisions
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Scaling(e) => scaling_kind(e),
            Self::Events(e) => match e {
                EventStoreError::Conflict { .. } | EventStoreError::RetriesExhausted { .. } => ErrorKind::Concurrency,
                EventStoreError::Timeout { .. } => ErrorKind::Dependency,
                e if e.is_integrity_failure() => ErrorKind::Integrity,
                _ => ErrorKind::Internal,
            },
            Self::Breaker(e) if e.is_fail_fast() => ErrorKind::FailFast,
            Self::Breaker(_) => ErrorKind::Dependency,
            Self::Chaos(e) => match e {
                ChaosError::Partition(p) => partition_kind(p),
                ChaosError::Scaling(s) => scaling_kind(s),
                ChaosError::InvalidConfig(_) => ErrorKind::Configuration,
                ChaosError::UnknownExperiment(_) => ErrorKind::InvalidRequest,
                e if e.is_rejected_request() => ErrorKind::InvalidRequest,
                _ => ErrorKind::Internal,
            },
            Self::Partition(e) => partition_kind(e),
            Self::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Retrying the same request can succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Concurrency | ErrorKind::Dependency)
    }

    /// Needs operator judgment; never retried automatically
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(self.kind(), ErrorKind::Integrity | ErrorKind::NonRecovery)
    }
}

fn scaling_kind(e: &ScalingError) -> ErrorKind {
    match e {
        e if e.is_capacity() => ErrorKind::Capacity,
        ScalingError::InvalidPolicy(_) => ErrorKind::Configuration,
        ScalingError::Provision(_) => ErrorKind::Dependency,
        ScalingError::ReplicaUnreachable(_) | ScalingError::ReplicaDraining(_) => ErrorKind::Capacity,
        _ => ErrorKind::Internal,
    }
}

fn partition_kind(e: &PartitionError) -> ErrorKind {
    match e {
        PartitionError::HealingFailed { .. } => ErrorKind::NonRecovery,
        PartitionError::Scaling(s) => scaling_kind(s),
        _ => ErrorKind::InvalidRequest,
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path attempted
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML for [`crate::CoreConfig`]
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Breaker section rejected
    #[error(transparent)]
    Breaker(#[from] InvalidBreakerConfig),

    /// Scaling section rejected
    #[error(transparent)]
    Scaling(#[from] ScalingError),

    /// Chaos section rejected
    #[error(transparent)]
    Chaos(#[from] ChaosError),

    /// Any other section rejected
    #[error("invalid {section} config: {reason}")]
    Invalid {
        /// Section name
        section: &'static str,
        /// What is wrong
        reason: String,
    },
}
