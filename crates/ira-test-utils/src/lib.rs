//! Testing utilities for the IRA workspace
//!
//! Scripted agent executors, flaky operations, pre-populated cores and
//! event fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use ira_core::{AgentExecutor, AgentOutcome, CoreConfig, ExecutionError, Incident, ResilienceCore};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use ira_events::{
    event_types, EventStore, EventStoreError, ExpectedVersion, IncidentEvent, IncidentId, IncidentState,
    InMemoryEventStore, NewEvent,
};
use ira_scaling::{AgentReplica, AgentType, InMemoryProvisioner, ReplicaId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted executor response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Resolve(String),
    Fail(String),
    /// Sleep, then succeed; long enough to trip the breaker timeout
    Hang(Duration),
}

/// Executor that replays a fixed script, then succeeds forever
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(ReplicaId, IncidentId)>>,
}

impl ScriptedExecutor {
    pub fn new<I: IntoIterator<Item = Step>>(steps: I) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::default()
    }

    pub fn failing(n: usize) -> Self {
        Self::new((0..n).map(|i| Step::Fail(format!("scripted failure {i}"))))
    }

    /// Replica and incident of every call, in order
    pub fn calls(&self) -> Vec<(ReplicaId, IncidentId)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, replica: &AgentReplica, incident: &Incident) -> Result<AgentOutcome, ExecutionError> {
        self.calls
            .lock()
            .push((replica.replica_id.clone(), incident.incident_id.clone()));
        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(AgentOutcome::summary(format!("{} ok", incident.agent_type))),
            Step::Resolve(resolution) => Ok(AgentOutcome::resolved("resolved", resolution)),
            Step::Fail(reason) => Err(ExecutionError::new(reason)),
            Step::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(AgentOutcome::summary("late"))
            }
        }
    }
}

/// Operation that fails a set number of times, then succeeds
#[derive(Debug)]
pub struct FlakyOp {
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyOp {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub async fn call(&self) -> Result<u32, String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let left = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match left {
            Ok(_) => Err(format!("flaky failure on attempt {attempt}")),
            Err(_) => Ok(attempt),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// In-memory store whose appends time out once `allowed` have succeeded
#[derive(Debug, Default)]
pub struct FailingAppendStore {
    inner: InMemoryEventStore,
    allowed: u32,
    appended: AtomicU32,
}

impl FailingAppendStore {
    pub fn new(allowed: u32) -> Self {
        Self {
            allowed,
            ..Self::default()
        }
    }
}

#[async_trait]
impl EventStore for FailingAppendStore {
    async fn append_event(
        &self,
        incident_id: &IncidentId,
        event: NewEvent,
        expected: ExpectedVersion,
    ) -> Result<u64, EventStoreError> {
        if self.appended.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(EventStoreError::Timeout {
                operation: "append_event",
                after_ms: 0,
            });
        }
        self.inner.append_event(incident_id, event, expected).await
    }

    async fn get_events(&self, incident_id: &IncidentId, from_version: u64) -> Result<Vec<IncidentEvent>, EventStoreError> {
        self.inner.get_events(incident_id, from_version).await
    }

    async fn get_current_version(&self, incident_id: &IncidentId) -> Result<u64, EventStoreError> {
        self.inner.get_current_version(incident_id).await
    }

    async fn replay_events(&self, incident_id: &IncidentId) -> Result<IncidentState, EventStoreError> {
        self.inner.replay_events(incident_id).await
    }

    async fn load_state(&self, incident_id: &IncidentId) -> Result<IncidentState, EventStoreError> {
        self.inner.load_state(incident_id).await
    }

    fn stream_events(&self, from_timestamp: DateTime<Utc>) -> BoxStream<'static, IncidentEvent> {
        self.inner.stream_events(from_timestamp)
    }

    async fn create_snapshot(&self, incident_id: &IncidentId, state: IncidentState) -> Result<(), EventStoreError> {
        self.inner.create_snapshot(incident_id, state).await
    }

    async fn get_snapshot(&self, incident_id: &IncidentId) -> Result<Option<IncidentState>, EventStoreError> {
        self.inner.get_snapshot(incident_id).await
    }

    async fn verify_integrity(&self, incident_id: &IncidentId) -> Result<bool, EventStoreError> {
        self.inner.verify_integrity(incident_id).await
    }

    async fn detect_corruption(&self) -> Result<Vec<IncidentId>, EventStoreError> {
        self.inner.detect_corruption().await
    }

    async fn repair_from_replica(&self, incident_id: &IncidentId, replica_region: &str) -> Result<bool, EventStoreError> {
        self.inner.repair_from_replica(incident_id, replica_region).await
    }
}

/// Replica IDs `{prefix}1..={prefix}n`
pub fn replica_ids(prefix: &str, n: usize) -> Vec<ReplicaId> {
    (1..=n).map(|i| ReplicaId::from(format!("{prefix}{i}").as_str())).collect()
}

/// Core whose `agent_type` pool holds the named replicas in `us-east-1`
pub fn core_with_fleet(config: CoreConfig, agent_type: AgentType, ids: &[ReplicaId]) -> ResilienceCore {
    let core = ResilienceCore::new(config, Arc::new(InMemoryProvisioner::new())).unwrap();
    for id in ids {
        core.scaling()
            .register_replica(agent_type, "us-east-1", id.as_str())
            .unwrap();
    }
    core
}

/// `n` events covering the whole incident lifecycle, resolved last
pub fn lifecycle_events(n: usize) -> Vec<NewEvent> {
    let mut events = vec![NewEvent::new(
        event_types::INCIDENT_CREATED,
        serde_json::json!({ "title": "fixture incident", "severity": "high" }),
    )];
    for i in 1..n.saturating_sub(1) {
        let agent_type = AgentType::ALL[i % AgentType::ALL.len()];
        let event = if i % 2 == 1 {
            NewEvent::new(
                event_types::AGENT_ASSIGNED,
                serde_json::json!({ "agent_type": agent_type.as_str(), "replica_id": format!("r{i}") }),
            )
        } else {
            NewEvent::new(
                event_types::AGENT_COMPLETED,
                serde_json::json!({ "agent_type": agent_type.as_str() }),
            )
        };
        events.push(event);
    }
    if n > 1 {
        events.push(NewEvent::new(
            event_types::INCIDENT_RESOLVED,
            serde_json::json!({ "resolution": "fixture resolved" }),
        ));
    }
    events.truncate(n);
    events
}

/// Append [`lifecycle_events`] to `store`, returning the final version
pub async fn seed_chain<S: EventStore + ?Sized>(store: &S, incident_id: &IncidentId, n: usize) -> u64 {
    let mut version = 0;
    for event in lifecycle_events(n) {
        version = store
            .append_event(incident_id, event, ExpectedVersion::Exact(version))
            .await
            .unwrap();
    }
    version
}
