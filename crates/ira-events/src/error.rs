//! Error types for the incident event store
//!
//! Conflicts are a normal outcome of optimistic appends and must be
//! retried by the caller; integrity errors are escalated, never retried.

use crate::types::IncidentId;

/// Event store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventStoreError {
    /// Another writer claimed the expected sequence number first
    #[error("optimistic lock conflict on {incident_id}: expected version {expected}, found {actual}")]
    Conflict {
        /// Incident whose chain moved
        incident_id: IncidentId,
        /// Version the caller read
        expected: u64,
        /// Version found at commit time
        actual: u64,
    },

    /// Chain failed verification and is awaiting repair
    #[error("event chain for {0} is corrupted and flagged for repair")]
    ChainCorrupted(IncidentId),

    /// No replica registered for the requested region
    #[error("no replica registered for region {0}")]
    ReplicaUnavailable(String),

    /// Replica copy could not be verified either
    #[error("replica in region {region} holds no verifiable chain for {incident_id}")]
    ReplicaUnverifiable {
        /// Incident being repaired
        incident_id: IncidentId,
        /// Region consulted
        region: String,
    },

    /// Snapshot is ahead of the stored chain
    #[error("snapshot version {snapshot} exceeds current version {current} for {incident_id}")]
    SnapshotAhead {
        /// Incident
        incident_id: IncidentId,
        /// Version claimed by the snapshot
        snapshot: u64,
        /// Version of the chain
        current: u64,
    },

    /// Suspension point exceeded its bound
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Bound that elapsed
        after_ms: u64,
    },

    /// Optimistic retry loop gave up
    #[error("append to {incident_id} still conflicting after {attempts} attempts")]
    RetriesExhausted {
        /// Incident
        incident_id: IncidentId,
        /// Attempts made
        attempts: u32,
    },
}

impl EventStoreError {
    /// Whether re-reading the version and retrying can succeed
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the condition needs an operator
    #[inline]
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::ChainCorrupted(_) | Self::ReplicaUnverifiable { .. } | Self::ReplicaUnavailable(_)
        )
    }
}

/// Where and how a chain broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainViolation {
    /// Sequence numbers are not exactly 1..=n
    SequenceGap {
        /// Expected sequence number
        expected: u64,
        /// Found sequence number
        found: u64,
    },
    /// Stored checksum differs from the recomputed digest
    ChecksumMismatch {
        /// Offending event
        sequence_number: u64,
    },
    /// Event belongs to a different incident
    ForeignEvent {
        /// Offending event
        sequence_number: u64,
    },
}
