//! Core types for the incident event store
//!
//! - [`IncidentEvent`]: one immutable, checksummed fact
//! - [`NewEvent`]: what callers hand to `append_event`
//! - [`IncidentState`]: the materialized view produced by replay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Incident identifier (assigned by the caller)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub String);

impl IncidentId {
    /// Create new incident ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IncidentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IncidentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event type names understood by the replay fold.
///
/// Any other type is accepted and merged into [`IncidentState::attributes`].
pub mod event_types {
    /// `{ "title": str, "severity": str }`
    pub const INCIDENT_CREATED: &str = "incident_created";
    /// `{ "agent_type": str, "replica_id": str }`
    pub const AGENT_ASSIGNED: &str = "agent_assigned";
    /// `{ "agent_type": str, "replica_id": str }`
    pub const AGENT_COMPLETED: &str = "agent_completed";
    /// `{ "agent_type": str, "replica_id": str, "reason": str }`
    pub const AGENT_FAILED: &str = "agent_failed";
    /// `{ "status": "open" | "investigating" | "mitigating" | "resolved" }`
    pub const STATUS_CHANGED: &str = "status_changed";
    /// `{ "resolution": str }`
    pub const INCIDENT_RESOLVED: &str = "incident_resolved";
}

/// One append-only fact in an incident's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Owning incident
    pub incident_id: IncidentId,
    /// Event type name
    pub event_type: String,
    /// Opaque structured payload
    pub event_data: serde_json::Value,
    /// Commit time (non-decreasing within a chain)
    pub timestamp: DateTime<Utc>,
    /// 1-based position in the chain
    pub sequence_number: u64,
    /// Hex SHA-256 over the canonical fields and the previous checksum
    pub checksum: String,
}

/// Event as submitted by a writer, before the store assigns position and digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Event type name
    pub event_type: String,
    /// Payload
    pub event_data: serde_json::Value,
}

impl NewEvent {
    /// Create new event
    #[inline]
    #[must_use]
    pub fn new(event_type: impl Into<String>, event_data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            event_data,
        }
    }
}

/// Version precondition for an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the current version
    Any,
    /// Append only if the chain is exactly at this version
    Exact(u64),
}

/// Incident lifecycle as derived from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Recorded, no agent has reported yet
    #[default]
    Open,
    /// At least one agent is working on it
    Investigating,
    /// A remediation is being applied
    Mitigating,
    /// Closed
    Resolved,
}

/// Failure reported by an agent while handling the incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    /// Agent type that failed
    pub agent_type: String,
    /// Replica that reported
    pub replica_id: String,
    /// Reason string
    pub reason: String,
    /// Sequence number of the failure event
    pub at_version: u64,
}

/// Materialized incident view
///
/// Every field is a pure function of the event list; maps are ordered so
/// two replays compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentState {
    /// Incident
    pub incident_id: IncidentId,
    /// Number of events applied
    pub version: u64,
    /// Always equal to `version`
    pub event_count: u64,
    /// Timestamp of the last applied event
    pub last_updated: Option<DateTime<Utc>>,
    /// Title from `incident_created`
    pub title: Option<String>,
    /// Severity from `incident_created`
    pub severity: Option<String>,
    /// Lifecycle status
    pub status: IncidentStatus,
    /// Current replica per agent type
    pub assignments: BTreeMap<String, String>,
    /// Agent types that reported completion, in order
    pub completed_phases: Vec<String>,
    /// Reported failures, in order
    pub failures: Vec<AgentFailure>,
    /// Resolution text
    pub resolution: Option<String>,
    /// Payload of event types the fold does not interpret
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl IncidentState {
    /// Empty state at version 0
    #[must_use]
    pub fn new(incident_id: IncidentId) -> Self {
        Self {
            incident_id,
            version: 0,
            event_count: 0,
            last_updated: None,
            title: None,
            severity: None,
            status: IncidentStatus::Open,
            assignments: BTreeMap::new(),
            completed_phases: Vec::new(),
            failures: Vec::new(),
            resolution: None,
            attributes: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_id_serializes_transparently() {
        let id = IncidentId::from("inc-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"inc-42\"");
        assert_eq!(id.to_string(), "inc-42");
    }

    #[test]
    fn fresh_state_is_version_zero() {
        let state = IncidentState::new(IncidentId::from("inc-1"));
        assert_eq!(state.version, 0);
        assert_eq!(state.event_count, 0);
        assert_eq!(state.status, IncidentStatus::Open);
        assert!(state.last_updated.is_none());
    }

    #[test]
    fn status_uses_snake_case() {
        let status: IncidentStatus = serde_json::from_value(serde_json::json!("mitigating")).unwrap();
        assert_eq!(status, IncidentStatus::Mitigating);
    }
}
