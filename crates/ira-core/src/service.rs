//! The resilience core service object
//!
//! Built once at process start and shared by handle. Background loops
//! (breaker ticker, autoscaler) run between [`ResilienceCore::start`] and
//! [`ResilienceCore::shutdown`].

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::incident::{AgentExecutor, Incident, IncidentReport};
use ira_breaker::{BreakerDashboard, BreakerRegistry};
use ira_chaos::{ChaosDashboard, ChaosInjector, NetworkPartitionSimulator};
use ira_events::{append_with_retry, event_types, EventStore, ExpectedVersion, InMemoryEventStore, NewEvent};
use ira_scaling::{AgentReplica, AgentType, Provisioner, ReplicaScalingService, ScalingMetrics, WorkItem};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Everything the dashboards read, in one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreStatus {
    /// Replicas per agent type
    pub replicas: BTreeMap<AgentType, Vec<AgentReplica>>,
    /// Scaling metrics
    pub scaling: ScalingMetrics,
    /// Breaker dashboard
    pub breakers: BreakerDashboard,
    /// Chaos dashboard
    pub chaos: ChaosDashboard,
}

/// Breaker name protecting calls to an agent type
#[must_use]
pub fn agent_dependency(agent_type: AgentType) -> String {
    format!("agent:{agent_type}")
}

/// Replica routing, breakers, chaos and event history behind one handle
#[derive(Debug)]
pub struct ResilienceCore {
    config: CoreConfig,
    events: Arc<dyn EventStore>,
    breakers: Arc<BreakerRegistry>,
    scaling: Arc<ReplicaScalingService>,
    partitions: Arc<NetworkPartitionSimulator>,
    chaos: Arc<ChaosInjector>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResilienceCore {
    /// Build every component with an in-memory event store
    ///
    /// # Errors
    /// `Config` if `config` does not validate.
    pub fn new(config: CoreConfig, provisioner: Arc<dyn Provisioner>) -> Result<Self, CoreError> {
        let events = Arc::new(InMemoryEventStore::new(config.events.clone()));
        Self::with_event_store(config, provisioner, events)
    }

    /// Build every component around an existing event store
    ///
    /// # Errors
    /// `Config` if `config` does not validate.
    pub fn with_event_store(
        config: CoreConfig,
        provisioner: Arc<dyn Provisioner>,
        events: Arc<dyn EventStore>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let scaling = Arc::new(ReplicaScalingService::new(config.scaling.clone(), provisioner));
        let partitions = Arc::new(NetworkPartitionSimulator::new(Arc::clone(&scaling)));
        let chaos = Arc::new(ChaosInjector::new(
            config.chaos.clone(),
            Arc::clone(&scaling),
            Arc::clone(&breakers),
            Arc::clone(&partitions),
        ));
        // every agent type gets a breaker up front so chaos can target it
        for agent_type in AgentType::ALL {
            breakers.breaker(&agent_dependency(agent_type));
        }
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            events,
            breakers,
            scaling,
            partitions,
            chaos,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Event store
    #[inline]
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Breaker registry
    #[inline]
    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Replica scaling service
    #[inline]
    #[must_use]
    pub fn scaling(&self) -> &Arc<ReplicaScalingService> {
        &self.scaling
    }

    /// Partition simulator
    #[inline]
    #[must_use]
    pub fn partitions(&self) -> &Arc<NetworkPartitionSimulator> {
        &self.partitions
    }

    /// Chaos injector
    #[inline]
    #[must_use]
    pub fn chaos(&self) -> &Arc<ChaosInjector> {
        &self.chaos
    }

    /// Spawn the breaker ticker and autoscaler; a second call is a no-op
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        self.shutdown.send_replace(false);
        tasks.push(self.breakers.spawn_ticker(self.shutdown.subscribe()));
        tasks.push(self.scaling.spawn_autoscaler(self.shutdown.subscribe()));
        info!("resilience core started");
    }

    /// Whether background loops are running
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Stop background loops and end every running chaos fault
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let stopped = self.chaos.stop_all();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!(stopped_experiments = stopped, "resilience core stopped");
    }

    /// Route one incident phase end to end
    ///
    /// 1. record the incident and open its event chain
    /// 2. select and assign a healthy replica
    /// 3. call the agent through the breaker for its type
    /// 4. release the replica and append the outcome
    ///
    /// # Errors
    /// - `Scaling` when no replica can take the work (not retried here)
    /// - `Breaker` when the agent call was refused or failed; the failure is
    ///   recorded in the event chain before returning
    /// - `Events` when the outcome could not be appended
    #[instrument(skip(self, incident, executor), fields(incident = %incident.incident_id, agent_type = %incident.agent_type))]
    pub async fn handle_incident(
        &self,
        incident: &Incident,
        executor: &dyn AgentExecutor,
    ) -> Result<IncidentReport, CoreError> {
        let incident_id = &incident.incident_id;
        let agent_type = incident.agent_type;
        self.scaling.record_incident(incident_id.as_str());
        self.open_chain(incident).await?;

        let mut work = WorkItem::new(incident.work_id()).with_severity(incident.severity);
        if let Some(region) = &incident.region {
            work = work.with_region(region.clone());
        }
        let replica = self
            .scaling
            .select_replica(agent_type, &work, self.config.scaling.default_strategy)?;
        self.scaling.assign(&replica.replica_id, &work.work_id)?;
        let assigned = self
            .append(
                incident,
                NewEvent::new(
                    event_types::AGENT_ASSIGNED,
                    json!({ "agent_type": agent_type.as_str(), "replica_id": replica.replica_id.as_str() }),
                ),
            )
            .await;
        if let Err(e) = assigned {
            self.release(&replica, &work);
            return Err(e);
        }

        let dependency = agent_dependency(agent_type);
        let result = self
            .breakers
            .call(&dependency, || executor.execute(&replica, incident))
            .await;
        self.release(&replica, &work);

        match result {
            Ok(outcome) => {
                let mut version = self
                    .append(
                        incident,
                        NewEvent::new(
                            event_types::AGENT_COMPLETED,
                            json!({
                                "agent_type": agent_type.as_str(),
                                "replica_id": replica.replica_id.as_str(),
                                "summary": outcome.summary,
                            }),
                        ),
                    )
                    .await?;
                if let Some(resolution) = &outcome.resolution {
                    version = self
                        .append(
                            incident,
                            NewEvent::new(event_types::INCIDENT_RESOLVED, json!({ "resolution": resolution })),
                        )
                        .await?;
                }
                metrics::counter!("ira_incident_phases_total", "agent_type" => agent_type.as_str(), "outcome" => "completed")
                    .increment(1);
                info!(replica = %replica.replica_id, version, "incident phase completed");
                Ok(IncidentReport {
                    incident_id: incident_id.clone(),
                    replica_id: replica.replica_id,
                    outcome,
                    version,
                })
            }
            Err(e) => {
                self.append(
                    incident,
                    NewEvent::new(
                        event_types::AGENT_FAILED,
                        json!({
                            "agent_type": agent_type.as_str(),
                            "replica_id": replica.replica_id.as_str(),
                            "reason": e.to_string(),
                        }),
                    ),
                )
                .await?;
                metrics::counter!("ira_incident_phases_total", "agent_type" => agent_type.as_str(), "outcome" => "failed")
                    .increment(1);
                warn!(replica = %replica.replica_id, error = %e, fail_fast = e.is_fail_fast(), "incident phase failed");
                Err(e.into())
            }
        }
    }

    /// Append `incident_created` if the chain is empty
    async fn open_chain(&self, incident: &Incident) -> Result<(), CoreError> {
        let created = NewEvent::new(
            event_types::INCIDENT_CREATED,
            json!({
                "title": incident.title,
                "severity": incident.severity,
            }),
        );
        match self
            .events
            .append_event(&incident.incident_id, created, ExpectedVersion::Exact(0))
            .await
        {
            // someone else opened it first
            Ok(_) | Err(ira_events::EventStoreError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, replica: &AgentReplica, work: &WorkItem) {
        if let Err(e) = self.scaling.release(&replica.replica_id, &work.work_id) {
            warn!(replica = %replica.replica_id, error = %e, "replica release failed");
        }
    }

    async fn append(&self, incident: &Incident, event: NewEvent) -> Result<u64, CoreError> {
        Ok(append_with_retry(&*self.events, &incident.incident_id, event, self.config.append_attempts).await?)
    }

    /// Replica, scaling, breaker and chaos views together
    #[must_use]
    pub fn status(&self) -> CoreStatus {
        let replicas = AgentType::ALL
            .into_iter()
            .map(|t| (t, self.scaling.list_replicas(t)))
            .collect();
        CoreStatus {
            replicas,
            scaling: self.scaling.get_metrics(),
            breakers: self.breakers.dashboard(),
            chaos: self.chaos.dashboard(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::SeededExecutor;
    use ira_events::IncidentStatus;
    use ira_scaling::{InMemoryProvisioner, ScalingPolicy};

    fn core() -> ResilienceCore {
        let config = CoreConfig::default().with_scaling(
            ira_scaling::ScalingConfig::default()
                .with_policy(AgentType::Resolution, ScalingPolicy::default().with_replicas(1, 4)),
        );
        ResilienceCore::new(config, Arc::new(InMemoryProvisioner::new())).unwrap()
    }

    #[tokio::test]
    async fn resolution_phase_closes_incident() {
        let core = core();
        core.scaling().create_replica(AgentType::Resolution, "us-east-1").await.unwrap();
        let incident = Incident::new("inc-9", "cache stampede", AgentType::Resolution);

        let report = core
            .handle_incident(&incident, &SeededExecutor::new(1, 0.0))
            .await
            .unwrap();
        assert_eq!(report.version, 4);

        let state = core.events().replay_events(&incident.incident_id).await.unwrap();
        assert_eq!(state.status, IncidentStatus::Resolved);
        assert_eq!(state.title.as_deref(), Some("cache stampede"));
        assert_eq!(core.scaling().replica(&report.replica_id).unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn empty_pool_is_a_capacity_error() {
        let core = core();
        let incident = Incident::new("inc-1", "disk full", AgentType::Diagnosis);
        let err = core
            .handle_incident(&incident, &SeededExecutor::new(1, 0.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Capacity);
        // the chain was still opened
        assert_eq!(core.events().get_current_version(&incident.incident_id).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_shutdown_join_background_loops() {
        let core = core();
        core.start();
        core.start();
        assert!(core.is_running());
        core.shutdown().await;
        assert!(!core.is_running());
    }
}
