//! Network partition simulator
//!
//! A partition flips the affected replicas to unreachable in the scaling
//! service, so routing skips them while the rest of the fleet keeps serving.
//! Healing reconciles with last-writer-wins on assignment time: when the
//! same work is held on both sides, the newer assignment is kept and the
//! older one released. Ties go to the side that stayed available.

use crate::error::PartitionError;
use crate::types::{
    ConsistencyIssue, DispatchOutcome, IssueKind, NetworkPartitionSimulation, PartitionId, PartitionStatus,
    RecoveryAction,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ira_scaling::{AgentType, ReplicaId, ReplicaScalingService, StrategyKind, WorkId, WorkItem};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug)]
struct PendingWork {
    work_id: WorkId,
    target: ReplicaId,
    agent_type: AgentType,
    attempted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct PartitionRecord {
    sim: NetworkPartitionSimulation,
    pending: Vec<PendingWork>,
    self_heal: Option<JoinHandle<()>>,
}

/// Simulates split-brain between a subset of agents and the rest of the fleet
#[derive(Debug)]
pub struct NetworkPartitionSimulator {
    scaling: Arc<ReplicaScalingService>,
    partitions: DashMap<PartitionId, Arc<Mutex<PartitionRecord>>>,
    isolated: DashMap<ReplicaId, PartitionId>,
}

impl NetworkPartitionSimulator {
    /// Create simulator over the replica registry
    #[must_use]
    pub fn new(scaling: Arc<ReplicaScalingService>) -> Self {
        Self {
            scaling,
            partitions: DashMap::new(),
            isolated: DashMap::new(),
        }
    }

    fn record(&self, partition_id: &PartitionId) -> Result<Arc<Mutex<PartitionRecord>>, PartitionError> {
        self.partitions
            .get(partition_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| PartitionError::UnknownPartition(partition_id.clone()))
    }

    /// Isolate `affected_agents` for `duration_seconds`, then heal on its own
    ///
    /// # Errors
    /// `EmptyPartition`, `InvalidDuration`, `UnknownReplica` or
    /// `AlreadyIsolated`. Nothing is isolated on error.
    #[instrument(skip(self, affected_agents))]
    pub fn partition<I>(
        self: &Arc<Self>,
        affected_agents: I,
        duration_seconds: u64,
    ) -> Result<NetworkPartitionSimulation, PartitionError>
    where
        I: IntoIterator<Item = ReplicaId>,
    {
        let affected: BTreeSet<ReplicaId> = affected_agents.into_iter().collect();
        if affected.is_empty() {
            return Err(PartitionError::EmptyPartition);
        }
        if duration_seconds == 0 {
            return Err(PartitionError::InvalidDuration);
        }
        for replica_id in &affected {
            if self.scaling.replica(replica_id).is_none() {
                return Err(PartitionError::UnknownReplica(replica_id.clone()));
            }
        }

        let partition_id = PartitionId::generate();
        let mut claimed = Vec::with_capacity(affected.len());
        for replica_id in &affected {
            match self.isolated.entry(replica_id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(held) => {
                    let err = PartitionError::AlreadyIsolated {
                        replica_id: replica_id.clone(),
                        partition_id: held.get().clone(),
                    };
                    drop(held);
                    for id in claimed {
                        self.isolated.remove(&id);
                    }
                    return Err(err);
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(partition_id.clone());
                    claimed.push(replica_id.clone());
                }
            }
        }

        for replica_id in &affected {
            self.scaling.set_reachable(replica_id, false)?;
        }

        let sim = NetworkPartitionSimulation {
            partition_id: partition_id.clone(),
            affected_agents: affected,
            partition_start: Utc::now(),
            partition_duration_seconds: duration_seconds,
            healing_in_progress: false,
            status: PartitionStatus::Active,
            state_consistency_issues: Vec::new(),
            recovery_actions: Vec::new(),
            healed_at: None,
        };
        let record = Arc::new(Mutex::new(PartitionRecord {
            sim: sim.clone(),
            pending: Vec::new(),
            self_heal: None,
        }));
        self.partitions.insert(partition_id.clone(), Arc::clone(&record));

        let simulator = Arc::clone(self);
        let id = partition_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration_seconds)).await;
            debug!(partition = %id, "partition window elapsed");
            if let Err(e) = simulator.heal(&id) {
                error!(partition = %id, error = %e, "partition failed to self-heal");
            }
        });
        record.lock().self_heal = Some(handle);

        metrics::counter!("ira_partitions_started_total").increment(1);
        info!(partition = %partition_id, agents = sim.affected_agents.len(), duration_seconds, "partition started");
        Ok(sim)
    }

    /// Partition isolating `replica_id`, if any
    #[must_use]
    pub fn isolated_by(&self, replica_id: &ReplicaId) -> Option<PartitionId> {
        self.isolated.get(replica_id).map(|p| p.value().clone())
    }

    /// Send work to a specific replica
    ///
    /// Isolated targets do not receive it; the attempt is recorded as an
    /// undeliverable assignment and retried when the partition heals.
    ///
    /// # Errors
    /// Scaling errors from the assignment (capacity, duplicates, unknown replica).
    pub fn dispatch(&self, replica_id: &ReplicaId, work_id: &WorkId) -> Result<DispatchOutcome, PartitionError> {
        let Some(partition_id) = self.isolated_by(replica_id) else {
            let load = self.scaling.assign(replica_id, work_id)?;
            return Ok(DispatchOutcome::Delivered { load });
        };

        let replica = self
            .scaling
            .replica(replica_id)
            .ok_or_else(|| PartitionError::UnknownReplica(replica_id.clone()))?;
        let record = self.record(&partition_id)?;
        let mut record = record.lock();
        if record.sim.status == PartitionStatus::Healed {
            drop(record);
            let load = self.scaling.assign(replica_id, work_id)?;
            return Ok(DispatchOutcome::Delivered { load });
        }
        let now = Utc::now();
        record.pending.push(PendingWork {
            work_id: work_id.clone(),
            target: replica_id.clone(),
            agent_type: replica.agent_type,
            attempted_at: now,
        });
        push_issue(
            &mut record.sim,
            ConsistencyIssue {
                kind: IssueKind::UndeliverableAssignment,
                replica_id: replica_id.clone(),
                work_id: work_id.clone(),
                counterpart: None,
                detected_at: now,
            },
        );
        metrics::counter!("ira_partition_undeliverable_total").increment(1);
        warn!(partition = %partition_id, replica = %replica_id, work = %work_id, "work sent to isolated agent");
        Ok(DispatchOutcome::Undeliverable { partition_id })
    }

    /// Compare both sides of the partition and record new divergences
    ///
    /// Returns every issue recorded for the partition so far.
    ///
    /// # Errors
    /// `UnknownPartition`.
    pub fn detect_consistency_issues(&self, partition_id: &PartitionId) -> Result<Vec<ConsistencyIssue>, PartitionError> {
        let record = self.record(partition_id)?;
        let mut record = record.lock();
        if record.sim.status == PartitionStatus::Active {
            self.scan(&mut record.sim);
        }
        Ok(record.sim.state_consistency_issues.clone())
    }

    fn scan(&self, sim: &mut NetworkPartitionSimulation) {
        let now = Utc::now();
        let majority = self.majority_holdings(&sim.affected_agents);
        let affected: Vec<ReplicaId> = sim.affected_agents.iter().cloned().collect();
        for replica_id in &affected {
            let Ok(held) = self.scaling.active_work(replica_id) else {
                continue;
            };
            for (work_id, _) in held {
                push_issue(
                    sim,
                    ConsistencyIssue {
                        kind: IssueKind::OrphanedAssignment,
                        replica_id: replica_id.clone(),
                        work_id: work_id.clone(),
                        counterpart: None,
                        detected_at: now,
                    },
                );
                if let Some((holder, _)) = majority.get(&work_id) {
                    push_issue(
                        sim,
                        ConsistencyIssue {
                            kind: IssueKind::ConflictingAssignment,
                            replica_id: replica_id.clone(),
                            work_id,
                            counterpart: Some(holder.clone()),
                            detected_at: now,
                        },
                    );
                }
            }
        }
    }

    /// Work held outside `isolated`, with holder and assignment time
    fn majority_holdings(&self, isolated: &BTreeSet<ReplicaId>) -> HashMap<WorkId, (ReplicaId, DateTime<Utc>)> {
        let mut holdings = HashMap::new();
        for agent_type in AgentType::ALL {
            for replica in self.scaling.list_replicas(agent_type) {
                if isolated.contains(&replica.replica_id) {
                    continue;
                }
                if let Ok(held) = self.scaling.active_work(&replica.replica_id) {
                    for (work_id, at) in held {
                        holdings.insert(work_id, (replica.replica_id.clone(), at));
                    }
                }
            }
        }
        holdings
    }

    /// Reconnect the affected agents and reconcile divergent state
    ///
    /// Idempotent once healed. An escalated partition retries the work it
    /// could not place.
    ///
    /// # Errors
    /// `UnknownPartition`; `HealingFailed` when undeliverable work could be
    /// neither redelivered nor rerouted (partition left `Escalated`).
    #[instrument(skip(self))]
    pub fn heal(&self, partition_id: &PartitionId) -> Result<NetworkPartitionSimulation, PartitionError> {
        let record = self.record(partition_id)?;
        let mut guard = record.lock();
        let record = &mut *guard;
        if record.sim.status == PartitionStatus::Healed {
            return Ok(record.sim.clone());
        }
        record.sim.healing_in_progress = true;

        if record.sim.status == PartitionStatus::Active {
            self.scan(&mut record.sim);
            let actions = self.resolve_conflicts(&record.sim);
            record.sim.recovery_actions.extend(actions);

            for replica_id in &record.sim.affected_agents {
                match self.scaling.set_reachable(replica_id, true) {
                    Ok(()) => record.sim.recovery_actions.push(RecoveryAction::Reconnected {
                        replica_id: replica_id.clone(),
                    }),
                    Err(e) => warn!(partition = %partition_id, replica = %replica_id, error = %e, "agent gone before heal"),
                }
                self.isolated.remove(replica_id);
            }
        }

        let pending = std::mem::take(&mut record.pending);
        for work in pending {
            match self.place(work) {
                Ok(action) => record.sim.recovery_actions.push(action),
                Err(work) => record.pending.push(work),
            }
        }

        if let Some(handle) = record.self_heal.take() {
            handle.abort();
        }

        if record.pending.is_empty() {
            record.sim.healing_in_progress = false;
            record.sim.status = PartitionStatus::Healed;
            record.sim.healed_at = Some(Utc::now());
            metrics::counter!("ira_partitions_healed_total").increment(1);
            info!(
                partition = %partition_id,
                issues = record.sim.state_consistency_issues.len(),
                actions = record.sim.recovery_actions.len(),
                "partition healed"
            );
            Ok(record.sim.clone())
        } else {
            record.sim.status = PartitionStatus::Escalated;
            metrics::counter!("ira_partitions_escalated_total").increment(1);
            error!(partition = %partition_id, unresolved = record.pending.len(), "partition healing escalated");
            Err(PartitionError::HealingFailed {
                partition_id: partition_id.clone(),
                unresolved: record.pending.len(),
            })
        }
    }

    /// Last-writer-wins over work held on both sides
    fn resolve_conflicts(&self, sim: &NetworkPartitionSimulation) -> Vec<RecoveryAction> {
        let majority = self.majority_holdings(&sim.affected_agents);
        let mut actions = Vec::new();
        for replica_id in &sim.affected_agents {
            let Ok(held) = self.scaling.active_work(replica_id) else {
                continue;
            };
            for (work_id, isolated_at) in held {
                let Some((holder, majority_at)) = majority.get(&work_id) else {
                    actions.push(RecoveryAction::Reclaimed {
                        work_id,
                        replica_id: replica_id.clone(),
                    });
                    continue;
                };
                let (kept, released) = if isolated_at > *majority_at {
                    (replica_id.clone(), holder.clone())
                } else {
                    (holder.clone(), replica_id.clone())
                };
                if let Err(e) = self.scaling.release(&released, &work_id) {
                    warn!(work = %work_id, replica = %released, error = %e, "conflict release failed");
                    continue;
                }
                actions.push(RecoveryAction::ConflictResolved { work_id, kept, released });
            }
        }
        actions
    }

    /// Redeliver, reroute or supersede one undeliverable item
    fn place(&self, work: PendingWork) -> Result<RecoveryAction, PendingWork> {
        let mut isolated = BTreeSet::new();
        isolated.insert(work.target.clone());
        if let Some((holder, at)) = self.majority_holdings(&isolated).get(&work.work_id) {
            if *at >= work.attempted_at {
                return Ok(RecoveryAction::Superseded {
                    work_id: work.work_id,
                    holder: holder.clone(),
                });
            }
        }

        if self.scaling.assign(&work.target, &work.work_id).is_ok() {
            return Ok(RecoveryAction::Redelivered {
                work_id: work.work_id,
                replica_id: work.target,
            });
        }

        let item = WorkItem::new(work.work_id.clone());
        let rerouted = self
            .scaling
            .select_replica(work.agent_type, &item, StrategyKind::LeastConnections)
            .and_then(|r| self.scaling.assign(&r.replica_id, &work.work_id).map(|_| r.replica_id));
        match rerouted {
            Ok(to) => Ok(RecoveryAction::Rerouted {
                work_id: work.work_id,
                from: work.target,
                to,
            }),
            Err(e) => {
                warn!(work = %work.work_id, error = %e, "undeliverable work could not be placed");
                Err(work)
            }
        }
    }

    /// One partition
    #[must_use]
    pub fn get(&self, partition_id: &PartitionId) -> Option<NetworkPartitionSimulation> {
        self.partitions.get(partition_id).map(|r| r.value().lock().sim.clone())
    }

    /// Every partition, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<NetworkPartitionSimulation> {
        let mut all: Vec<NetworkPartitionSimulation> =
            self.partitions.iter().map(|r| r.value().lock().sim.clone()).collect();
        all.sort_by(|a, b| a.partition_start.cmp(&b.partition_start).then_with(|| a.partition_id.cmp(&b.partition_id)));
        all
    }

    /// Partitions still isolating agents
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|r| r.value().lock().sim.status == PartitionStatus::Active)
            .count()
    }
}

fn push_issue(sim: &mut NetworkPartitionSimulation, issue: ConsistencyIssue) {
    if !sim.state_consistency_issues.iter().any(|i| i.same_divergence(&issue)) {
        sim.state_consistency_issues.push(issue);
    }
}
