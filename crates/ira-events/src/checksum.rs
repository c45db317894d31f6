//! Hash chaining for incident event chains
//!
//! Each checksum covers the event's canonical fields plus the previous
//! event's checksum, so payload edits, reordering and deletions all break
//! verification from the first affected event onward.

use crate::error::ChainViolation;
use crate::types::{IncidentEvent, IncidentId};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Previous-link value for the first event of a chain
pub const GENESIS: &str = "";

/// Compute the checksum of an event given its predecessor's checksum
#[must_use]
pub fn compute_checksum(
    prev_checksum: &str,
    incident_id: &IncidentId,
    event_type: &str,
    event_data: &serde_json::Value,
    timestamp: &DateTime<Utc>,
    sequence_number: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_checksum.as_bytes());
    hasher.update([0]);
    hasher.update(incident_id.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event_type.as_bytes());
    hasher.update([0]);
    // serde_json maps are key-ordered, so Display is canonical
    hasher.update(event_data.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(sequence_number.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the checksum a stored event should carry
#[must_use]
pub fn expected_checksum(prev_checksum: &str, event: &IncidentEvent) -> String {
    compute_checksum(
        prev_checksum,
        &event.incident_id,
        &event.event_type,
        &event.event_data,
        &event.timestamp,
        event.sequence_number,
    )
}

/// Verify a full chain for `incident_id`
///
/// # Errors
/// Returns the first violation found, scanning from sequence number 1.
pub fn verify_chain(incident_id: &IncidentId, events: &[IncidentEvent]) -> Result<(), ChainViolation> {
    let mut prev = GENESIS;
    for (idx, event) in events.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        if event.sequence_number != expected_seq {
            return Err(ChainViolation::SequenceGap {
                expected: expected_seq,
                found: event.sequence_number,
            });
        }
        if &event.incident_id != incident_id {
            return Err(ChainViolation::ForeignEvent {
                sequence_number: event.sequence_number,
            });
        }
        if expected_checksum(prev, event) != event.checksum {
            return Err(ChainViolation::ChecksumMismatch {
                sequence_number: event.sequence_number,
            });
        }
        prev = &event.checksum;
    }
    Ok(())
}
