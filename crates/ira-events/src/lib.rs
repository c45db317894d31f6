//! IRA Event Store (ira-events)
//!
//! Append-only, per-incident event chains with:
//! 1. **Optimistic appends**: version-checked, conflicts returned to the caller
//! 2. **Hash chaining**: SHA-256 over each event and its predecessor
//! 3. **Replay**: deterministic fold to [`IncidentState`], bounded by snapshots
//! 4. **Repair**: corrupted chains are flagged and restored from a replica region
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ira_events::prelude::*;
//!
//! let store = InMemoryEventStore::default();
//! let id = IncidentId::from("inc-1");
//! let v = store
//!     .append_event(&id, NewEvent::new("incident_created", json), ExpectedVersion::Exact(0))
//!     .await?;
//! let state = store.load_state(&id).await?;
//! ```

pub mod checksum;
pub mod error;
pub mod replay;
pub mod store;
pub mod types;

pub use error::{ChainViolation, EventStoreError};
pub use store::{append_with_retry, EventStore, EventStoreConfig, InMemoryEventStore, ReplicaSource};
pub use types::*;

/// Common imports
pub mod prelude {
    pub use crate::error::EventStoreError;
    pub use crate::store::{append_with_retry, EventStore, EventStoreConfig, InMemoryEventStore, ReplicaSource};
    pub use crate::types::{
        event_types, ExpectedVersion, IncidentEvent, IncidentId, IncidentState, IncidentStatus, NewEvent,
    };
}
