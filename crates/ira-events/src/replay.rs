//! Replay fold from events to [`IncidentState`]
//!
//! The fold is pure: it reads nothing but the event and the accumulated
//! state, so replaying the same chain always yields the same value.

use crate::types::{event_types, AgentFailure, IncidentEvent, IncidentId, IncidentState, IncidentStatus};
use serde_json::Value;

/// Fold a chain into state, starting from version 0
///
/// Events are applied in sequence-number order regardless of input order.
#[must_use]
pub fn replay(incident_id: &IncidentId, events: &[IncidentEvent]) -> IncidentState {
    fold_from(IncidentState::new(incident_id.clone()), events)
}

/// Fold events newer than `base.version` on top of `base`
#[must_use]
pub fn fold_from(base: IncidentState, events: &[IncidentEvent]) -> IncidentState {
    let mut ordered: Vec<&IncidentEvent> = events
        .iter()
        .filter(|e| e.sequence_number > base.version)
        .collect();
    ordered.sort_by_key(|e| e.sequence_number);

    let mut state = base;
    for event in ordered {
        apply(&mut state, event);
    }
    state
}

/// Apply a single event
pub fn apply(state: &mut IncidentState, event: &IncidentEvent) {
    let data = &event.event_data;
    match event.event_type.as_str() {
        event_types::INCIDENT_CREATED => {
            if let Some(title) = str_field(data, "title") {
                state.title = Some(title);
            }
            if let Some(severity) = str_field(data, "severity") {
                state.severity = Some(severity);
            }
        }
        event_types::AGENT_ASSIGNED => {
            if let (Some(agent_type), Some(replica)) =
                (str_field(data, "agent_type"), str_field(data, "replica_id"))
            {
                state.assignments.insert(agent_type, replica);
            }
            if state.status == IncidentStatus::Open {
                state.status = IncidentStatus::Investigating;
            }
        }
        event_types::AGENT_COMPLETED => {
            if let Some(agent_type) = str_field(data, "agent_type") {
                state.completed_phases.push(agent_type);
            }
        }
        event_types::AGENT_FAILED => {
            state.failures.push(AgentFailure {
                agent_type: str_field(data, "agent_type").unwrap_or_default(),
                replica_id: str_field(data, "replica_id").unwrap_or_default(),
                reason: str_field(data, "reason").unwrap_or_default(),
                at_version: event.sequence_number,
            });
        }
        event_types::STATUS_CHANGED => {
            if let Some(status) = data
                .get("status")
                .and_then(|s| serde_json::from_value::<IncidentStatus>(s.clone()).ok())
            {
                state.status = status;
            }
        }
        event_types::INCIDENT_RESOLVED => {
            state.status = IncidentStatus::Resolved;
            state.resolution = str_field(data, "resolution");
        }
        other => match data {
            Value::Object(map) => {
                for (k, v) in map {
                    state.attributes.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            value => {
                state.attributes.insert(other.to_string(), value.clone());
            }
        },
    }

    state.version = event.sequence_number;
    state.event_count += 1;
    state.last_updated = Some(event.timestamp);
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}
