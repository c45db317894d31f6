//! Event store contract and the in-memory implementation
//!
//! Appends are version-checked rather than locked at the API level: a
//! writer reads the current version, submits `ExpectedVersion::Exact`, and
//! gets [`EventStoreError::Conflict`] back if someone else committed first.
//! The per-incident `RwLock` only guards the in-memory vector for the
//! duration of the check-and-push.

use crate::checksum::{compute_checksum, verify_chain, GENESIS};
use crate::error::EventStoreError;
use crate::replay::{fold_from, replay};
use crate::types::{ExpectedVersion, IncidentEvent, IncidentId, IncidentState, NewEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Event store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Snapshot every N events per incident (0 disables)
    pub snapshot_every: u64,
    /// Capacity of the live feed before slow observers lag
    pub stream_buffer: usize,
    /// Bound on a cross-region chain fetch
    pub repair_timeout_ms: u64,
}

impl EventStoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With snapshot interval
    #[inline]
    #[must_use]
    pub fn with_snapshot_every(mut self, every: u64) -> Self {
        self.snapshot_every = every;
        self
    }

    /// With repair fetch timeout
    #[inline]
    #[must_use]
    pub fn with_repair_timeout_ms(mut self, ms: u64) -> Self {
        self.repair_timeout_ms = ms;
        self
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            snapshot_every: 50,
            stream_buffer: 1024,
            repair_timeout_ms: 5_000,
        }
    }
}

/// Durable, replayable, integrity-checked history of per-incident facts
#[async_trait]
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Append an event; returns the new version
    ///
    /// # Errors
    /// - `Conflict` if `expected` no longer matches the chain
    /// - `ChainCorrupted` if the chain is flagged for repair
    async fn append_event(
        &self,
        incident_id: &IncidentId,
        event: NewEvent,
        expected: ExpectedVersion,
    ) -> Result<u64, EventStoreError>;

    /// Events with `sequence_number > from_version`, in order
    async fn get_events(
        &self,
        incident_id: &IncidentId,
        from_version: u64,
    ) -> Result<Vec<IncidentEvent>, EventStoreError>;

    /// Current version (0 for unknown incidents)
    async fn get_current_version(&self, incident_id: &IncidentId) -> Result<u64, EventStoreError>;

    /// Fold every event from version 0
    async fn replay_events(&self, incident_id: &IncidentId) -> Result<IncidentState, EventStoreError>;

    /// Snapshot plus newer events; always equal to `replay_events`
    async fn load_state(&self, incident_id: &IncidentId) -> Result<IncidentState, EventStoreError>;

    /// Time-ordered backlog from `from_timestamp`, then the live feed
    fn stream_events(&self, from_timestamp: DateTime<Utc>) -> BoxStream<'static, IncidentEvent>;

    /// Store a materialized state
    async fn create_snapshot(
        &self,
        incident_id: &IncidentId,
        state: IncidentState,
    ) -> Result<(), EventStoreError>;

    /// Latest snapshot, if any
    async fn get_snapshot(&self, incident_id: &IncidentId) -> Result<Option<IncidentState>, EventStoreError>;

    /// Recompute checksums over the stored chain
    async fn verify_integrity(&self, incident_id: &IncidentId) -> Result<bool, EventStoreError>;

    /// Incidents whose chains fail verification; they are flagged for repair
    async fn detect_corruption(&self) -> Result<Vec<IncidentId>, EventStoreError>;

    /// Replace a corrupted chain with a verified copy from another region
    ///
    /// Returns `Ok(false)` when the local chain was already intact.
    async fn repair_from_replica(
        &self,
        incident_id: &IncidentId,
        replica_region: &str,
    ) -> Result<bool, EventStoreError>;
}

/// A copy of the log held in another region
#[async_trait]
pub trait ReplicaSource: Send + Sync + std::fmt::Debug {
    /// Fetch the full chain for an incident
    async fn fetch_chain(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError>;
}

/// Append with the caller-side optimistic retry loop
///
/// Re-reads the current version before every attempt.
///
/// # Errors
/// `RetriesExhausted` after `max_attempts` conflicts; other errors pass through.
pub async fn append_with_retry<S>(
    store: &S,
    incident_id: &IncidentId,
    event: NewEvent,
    max_attempts: u32,
) -> Result<u64, EventStoreError>
where
    S: EventStore + ?Sized,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let current = store.get_current_version(incident_id).await?;
        match store
            .append_event(incident_id, event.clone(), ExpectedVersion::Exact(current))
            .await
        {
            Ok(version) => return Ok(version),
            Err(e) if e.is_conflict() && attempts < max_attempts => {
                debug!(incident = %incident_id, attempts, "append conflict, retrying");
                tokio::task::yield_now().await;
            }
            Err(e) if e.is_conflict() => {
                return Err(EventStoreError::RetriesExhausted {
                    incident_id: incident_id.clone(),
                    attempts,
                })
            }
            Err(e) => return Err(e),
        }
    }
}

type Chain = Arc<RwLock<Vec<IncidentEvent>>>;

/// In-memory event store
#[derive(Debug)]
pub struct InMemoryEventStore {
    config: EventStoreConfig,
    chains: DashMap<IncidentId, Chain>,
    snapshots: DashMap<IncidentId, IncidentState>,
    flagged: DashMap<IncidentId, DateTime<Utc>>,
    replicas: DashMap<String, Arc<dyn ReplicaSource>>,
    feed: broadcast::Sender<IncidentEvent>,
}

impl InMemoryEventStore {
    /// Create new store
    #[must_use]
    pub fn new(config: EventStoreConfig) -> Self {
        let (feed, _) = broadcast::channel(config.stream_buffer.max(1));
        Self {
            config,
            chains: DashMap::new(),
            snapshots: DashMap::new(),
            flagged: DashMap::new(),
            replicas: DashMap::new(),
            feed,
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Register the copy held in `region`
    pub fn register_replica(&self, region: impl Into<String>, source: Arc<dyn ReplicaSource>) {
        self.replicas.insert(region.into(), source);
    }

    /// Install a chain verbatim, without validation
    ///
    /// Used to seed replicas and restore backups; the chain is checked on
    /// the next `verify_integrity`/`detect_corruption`.
    pub fn import_chain(&self, incident_id: &IncidentId, events: Vec<IncidentEvent>) {
        self.snapshots.remove(incident_id);
        match self.chain(incident_id) {
            Some(chain) => *chain.write() = events,
            None => {
                self.chains
                    .insert(incident_id.clone(), Arc::new(RwLock::new(events)));
            }
        }
    }

    /// Incidents currently flagged for repair
    #[must_use]
    pub fn flagged_for_repair(&self) -> Vec<IncidentId> {
        let mut ids: Vec<IncidentId> = self.flagged.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// All known incidents, sorted
    #[must_use]
    pub fn incident_ids(&self) -> Vec<IncidentId> {
        let mut ids: Vec<IncidentId> = self.chains.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn chain(&self, incident_id: &IncidentId) -> Option<Chain> {
        self.chains.get(incident_id).map(|c| Arc::clone(c.value()))
    }

    fn chain_or_create(&self, incident_id: &IncidentId) -> Chain {
        Arc::clone(self.chains.entry(incident_id.clone()).or_default().value())
    }

    fn events_of(&self, incident_id: &IncidentId) -> Vec<IncidentEvent> {
        self.chain(incident_id)
            .map(|c| c.read().clone())
            .unwrap_or_default()
    }

    fn store_snapshot(&self, incident_id: &IncidentId, state: IncidentState) {
        let mut entry = self
            .snapshots
            .entry(incident_id.clone())
            .or_insert_with(|| state.clone());
        if entry.version < state.version {
            *entry = state;
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(EventStoreConfig::default())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_event(
        &self,
        incident_id: &IncidentId,
        event: NewEvent,
        expected: ExpectedVersion,
    ) -> Result<u64, EventStoreError> {
        if self.flagged.contains_key(incident_id) {
            return Err(EventStoreError::ChainCorrupted(incident_id.clone()));
        }

        let chain = self.chain_or_create(incident_id);
        let committed = {
            let mut guard = chain.write();
            let current = guard.len() as u64;
            if let ExpectedVersion::Exact(expected) = expected {
                if expected != current {
                    metrics::counter!("ira_event_append_conflicts_total").increment(1);
                    return Err(EventStoreError::Conflict {
                        incident_id: incident_id.clone(),
                        expected,
                        actual: current,
                    });
                }
            }

            let sequence_number = current + 1;
            let now = Utc::now();
            let (prev, timestamp) = match guard.last() {
                Some(last) => (last.checksum.as_str(), last.timestamp.max(now)),
                None => (GENESIS, now),
            };
            let checksum = compute_checksum(
                prev,
                incident_id,
                &event.event_type,
                &event.event_data,
                &timestamp,
                sequence_number,
            );
            let committed = IncidentEvent {
                incident_id: incident_id.clone(),
                event_type: event.event_type,
                event_data: event.event_data,
                timestamp,
                sequence_number,
                checksum,
            };
            guard.push(committed.clone());
            // Published under the chain lock so the live feed keeps per-incident order.
            // No receivers is fine.
            let _ = self.feed.send(committed.clone());
            committed
        };

        let version = committed.sequence_number;
        metrics::counter!("ira_events_appended_total").increment(1);
        debug!(incident = %incident_id, version, event_type = %committed.event_type, "event appended");

        if self.config.snapshot_every > 0 && version % self.config.snapshot_every == 0 {
            let state = self.load_state(incident_id).await?;
            self.store_snapshot(incident_id, state);
        }
        Ok(version)
    }

    async fn get_events(
        &self,
        incident_id: &IncidentId,
        from_version: u64,
    ) -> Result<Vec<IncidentEvent>, EventStoreError> {
        Ok(self
            .chain(incident_id)
            .map(|c| {
                c.read()
                    .iter()
                    .filter(|e| e.sequence_number > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_current_version(&self, incident_id: &IncidentId) -> Result<u64, EventStoreError> {
        Ok(self.chain(incident_id).map_or(0, |c| c.read().len() as u64))
    }

    async fn replay_events(&self, incident_id: &IncidentId) -> Result<IncidentState, EventStoreError> {
        Ok(replay(incident_id, &self.events_of(incident_id)))
    }

    async fn load_state(&self, incident_id: &IncidentId) -> Result<IncidentState, EventStoreError> {
        let events = self.events_of(incident_id);
        let base = self
            .snapshots
            .get(incident_id)
            .map(|s| s.value().clone())
            .filter(|s| s.version <= events.len() as u64)
            .unwrap_or_else(|| IncidentState::new(incident_id.clone()));
        Ok(fold_from(base, &events))
    }

    fn stream_events(&self, from_timestamp: DateTime<Utc>) -> BoxStream<'static, IncidentEvent> {
        // Subscribe before reading the backlog so nothing falls in between
        let rx = self.feed.subscribe();

        let mut backlog: Vec<IncidentEvent> = self
            .chains
            .iter()
            .flat_map(|c| {
                c.value()
                    .read()
                    .iter()
                    .filter(|e| e.timestamp >= from_timestamp)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        backlog.sort_by(|a, b| {
            (a.timestamp, &a.incident_id, a.sequence_number).cmp(&(
                b.timestamp,
                &b.incident_id,
                b.sequence_number,
            ))
        });
        let seen: HashSet<(IncidentId, u64)> = backlog
            .iter()
            .map(|e| (e.incident_id.clone(), e.sequence_number))
            .collect();

        let live = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream observer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |e| {
            future::ready(
                e.timestamp >= from_timestamp
                    && !seen.contains(&(e.incident_id.clone(), e.sequence_number)),
            )
        });

        stream::iter(backlog).chain(live).boxed()
    }

    async fn create_snapshot(
        &self,
        incident_id: &IncidentId,
        state: IncidentState,
    ) -> Result<(), EventStoreError> {
        let current = self.get_current_version(incident_id).await?;
        if state.version > current {
            return Err(EventStoreError::SnapshotAhead {
                incident_id: incident_id.clone(),
                snapshot: state.version,
                current,
            });
        }
        self.snapshots.insert(incident_id.clone(), state);
        Ok(())
    }

    async fn get_snapshot(&self, incident_id: &IncidentId) -> Result<Option<IncidentState>, EventStoreError> {
        Ok(self.snapshots.get(incident_id).map(|s| s.value().clone()))
    }

    async fn verify_integrity(&self, incident_id: &IncidentId) -> Result<bool, EventStoreError> {
        match verify_chain(incident_id, &self.events_of(incident_id)) {
            Ok(()) => Ok(true),
            Err(violation) => {
                warn!(incident = %incident_id, ?violation, "event chain failed verification");
                Ok(false)
            }
        }
    }

    async fn detect_corruption(&self) -> Result<Vec<IncidentId>, EventStoreError> {
        let mut corrupted = Vec::new();
        for incident_id in self.incident_ids() {
            if !self.verify_integrity(&incident_id).await? {
                self.flagged.entry(incident_id.clone()).or_insert_with(Utc::now);
                metrics::counter!("ira_event_chains_corrupted_total").increment(1);
                error!(incident = %incident_id, "corrupted event chain flagged for repair");
                corrupted.push(incident_id);
            }
        }
        Ok(corrupted)
    }

    async fn repair_from_replica(
        &self,
        incident_id: &IncidentId,
        replica_region: &str,
    ) -> Result<bool, EventStoreError> {
        if self.verify_integrity(incident_id).await? {
            self.flagged.remove(incident_id);
            return Ok(false);
        }

        let source = self
            .replicas
            .get(replica_region)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| EventStoreError::ReplicaUnavailable(replica_region.to_string()))?;

        let after_ms = self.config.repair_timeout_ms;
        let fetched = tokio::time::timeout(Duration::from_millis(after_ms), source.fetch_chain(incident_id))
            .await
            .map_err(|_| EventStoreError::Timeout {
                operation: "repair_from_replica",
                after_ms,
            })??;

        if fetched.is_empty() || verify_chain(incident_id, &fetched).is_err() {
            error!(incident = %incident_id, region = replica_region, "replica chain unverifiable, escalating");
            return Err(EventStoreError::ReplicaUnverifiable {
                incident_id: incident_id.clone(),
                region: replica_region.to_string(),
            });
        }

        let restored = fetched.len();
        self.import_chain(incident_id, fetched);
        self.flagged.remove(incident_id);
        metrics::counter!("ira_event_chains_repaired_total").increment(1);
        info!(incident = %incident_id, region = replica_region, restored, "event chain repaired from replica");
        Ok(true)
    }
}

#[async_trait]
impl ReplicaSource for InMemoryEventStore {
    async fn fetch_chain(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        Ok(self.events_of(incident_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event_types;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn created() -> NewEvent {
        NewEvent::new(event_types::INCIDENT_CREATED, json!({ "title": "disk full", "severity": "high" }))
    }

    #[tokio::test]
    async fn append_assigns_sequential_versions() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-1");

        assert_eq!(store.append_event(&id, created(), ExpectedVersion::Exact(0)).await.unwrap(), 1);
        assert_eq!(store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap(), 2);
        assert_eq!(store.get_current_version(&id).await.unwrap(), 2);

        let events = store.get_events(&id, 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence_number, 2);
        assert!(events[0].timestamp >= store.get_events(&id, 0).await.unwrap()[0].timestamp);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-1");
        store.append_event(&id, created(), ExpectedVersion::Exact(0)).await.unwrap();

        let err = store
            .append_event(&id, created(), ExpectedVersion::Exact(0))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EventStoreError::Conflict {
                incident_id: id.clone(),
                expected: 0,
                actual: 1
            }
        );
        assert_eq!(store.get_current_version(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_incident_is_empty() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("nope");
        assert_eq!(store.get_current_version(&id).await.unwrap(), 0);
        assert!(store.get_events(&id, 0).await.unwrap().is_empty());
        assert_eq!(store.replay_events(&id).await.unwrap().version, 0);
        assert!(store.verify_integrity(&id).await.unwrap());
    }

    #[tokio::test]
    async fn periodic_snapshot_bounds_replay() {
        let store = InMemoryEventStore::new(EventStoreConfig::new().with_snapshot_every(3));
        let id = IncidentId::from("inc-1");
        for i in 0..7 {
            store
                .append_event(&id, NewEvent::new("note", json!({ "step": i })), ExpectedVersion::Any)
                .await
                .unwrap();
        }

        let snapshot = store.get_snapshot(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 6);
        assert_eq!(store.load_state(&id).await.unwrap(), store.replay_events(&id).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_ahead_of_chain_is_rejected() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-1");
        let mut state = IncidentState::new(id.clone());
        state.version = 4;
        let err = store.create_snapshot(&id, state).await.unwrap_err();
        assert!(matches!(err, EventStoreError::SnapshotAhead { snapshot: 4, current: 0, .. }));
    }

    #[tokio::test]
    async fn stream_yields_backlog_then_live() {
        let store = InMemoryEventStore::default();
        let a = IncidentId::from("inc-a");
        let b = IncidentId::from("inc-b");
        store.append_event(&a, created(), ExpectedVersion::Any).await.unwrap();

        let mut feed = store.stream_events(DateTime::<Utc>::MIN_UTC);
        store.append_event(&b, created(), ExpectedVersion::Any).await.unwrap();

        let first = feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!(first.incident_id, a);
        assert_eq!(second.incident_id, b);
    }

    #[tokio::test]
    async fn stream_skips_events_before_cutoff() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-a");
        store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::hours(1);

        let mut feed = store.stream_events(cutoff);
        let pending = tokio::time::timeout(Duration::from_millis(20), feed.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn corruption_is_flagged_and_blocks_appends() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-1");
        store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap();
        store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap();

        let mut events = store.get_events(&id, 0).await.unwrap();
        events[1].event_data = json!({ "title": "forged" });
        store.import_chain(&id, events);

        assert_eq!(store.detect_corruption().await.unwrap(), vec![id.clone()]);
        assert_eq!(store.flagged_for_repair(), vec![id.clone()]);
        let err = store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap_err();
        assert_eq!(err, EventStoreError::ChainCorrupted(id));
    }

    #[tokio::test]
    async fn repair_requires_registered_region() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-1");
        store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap();
        let mut events = store.get_events(&id, 0).await.unwrap();
        events[0].checksum = "00".repeat(32);
        store.import_chain(&id, events);

        let err = store.repair_from_replica(&id, "eu-west").await.unwrap_err();
        assert_eq!(err, EventStoreError::ReplicaUnavailable("eu-west".to_string()));
    }

    #[tokio::test]
    async fn intact_chain_needs_no_repair() {
        let store = InMemoryEventStore::default();
        let id = IncidentId::from("inc-1");
        store.append_event(&id, created(), ExpectedVersion::Any).await.unwrap();
        assert!(!store.repair_from_replica(&id, "anywhere").await.unwrap());
    }
}
