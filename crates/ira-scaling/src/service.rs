//! Replica scaling service
//!
//! Pools are sharded per agent type. The routing path takes a pool's read
//! lock only long enough to snapshot its replicas; load changes go through
//! the replica itself. Scaling actions for one agent type are serialized by
//! that pool's async mutex, which is held across provisioning calls.

use crate::error::ScalingError;
use crate::policy::{ScalingConfig, ScalingPolicy};
use crate::provisioner::{provision_with_retry, ProvisionRequest, Provisioner};
use crate::replica::Replica;
use crate::strategy::StrategyKind;
use crate::types::{
    AgentReplica, AgentType, NoOpReason, ReplicaId, ReplicaStatus, ScalingAction, ScalingMetrics, WorkId, WorkItem,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default)]
struct ScalingState {
    last_action: Option<Instant>,
    below_since: Option<Instant>,
}

#[derive(Debug)]
struct AgentPool {
    replicas: RwLock<Vec<Arc<Replica>>>,
    cursor: AtomicUsize,
    scaling: AsyncMutex<ScalingState>,
}

impl AgentPool {
    fn new() -> Self {
        Self {
            replicas: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            scaling: AsyncMutex::new(ScalingState::default()),
        }
    }

    fn members(&self) -> Vec<Arc<Replica>> {
        self.replicas.read().clone()
    }

    /// (sum of load, sum of capacity, replica count)
    fn totals(&self) -> (u64, u64, usize) {
        let replicas = self.replicas.read();
        let load = replicas.iter().map(|r| u64::from(r.load())).sum();
        let capacity = replicas.iter().map(|r| u64::from(r.max_capacity)).sum();
        (load, capacity, replicas.len())
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(load: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        load as f64 / capacity as f64
    }
}

/// Maintains replica pools and routes work to them
#[derive(Debug)]
pub struct ReplicaScalingService {
    config: ScalingConfig,
    provisioner: Arc<dyn Provisioner>,
    pools: DashMap<AgentType, Arc<AgentPool>>,
    index: DashMap<ReplicaId, Arc<Replica>>,
    incidents: Mutex<VecDeque<(Instant, String)>>,
    region_latency: DashMap<String, f64>,
    scaling_actions: AtomicU64,
    failover_events: AtomicU64,
}

impl ReplicaScalingService {
    /// Create service with empty pools
    #[must_use]
    pub fn new(config: ScalingConfig, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            config,
            provisioner,
            pools: DashMap::new(),
            index: DashMap::new(),
            incidents: Mutex::new(VecDeque::new()),
            region_latency: DashMap::new(),
            scaling_actions: AtomicU64::new(0),
            failover_events: AtomicU64::new(0),
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Policy in force for `agent_type`
    #[must_use]
    pub fn policy(&self, agent_type: AgentType) -> &ScalingPolicy {
        self.config.policy(agent_type)
    }

    fn pool(&self, agent_type: AgentType) -> Arc<AgentPool> {
        if let Some(pool) = self.pools.get(&agent_type) {
            return Arc::clone(pool.value());
        }
        Arc::clone(self.pools.entry(agent_type).or_insert_with(|| Arc::new(AgentPool::new())).value())
    }

    fn lookup(&self, replica_id: &ReplicaId) -> Result<Arc<Replica>, ScalingError> {
        self.index
            .get(replica_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ScalingError::UnknownReplica(replica_id.clone()))
    }

    fn insert(&self, pool: &AgentPool, replica: Replica) -> Result<AgentReplica, ScalingError> {
        let replica = Arc::new(replica);
        match self.index.entry(replica.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ScalingError::DuplicateReplica(replica.id.clone()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&replica));
            }
        }
        let count = {
            let mut replicas = pool.replicas.write();
            replicas.push(Arc::clone(&replica));
            replicas.len()
        };
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("ira_replicas", "agent_type" => replica.agent_type.as_str()).set(count as f64);
        Ok(replica.snapshot())
    }

    fn check_room(&self, agent_type: AgentType, pool: &AgentPool) -> Result<(), ScalingError> {
        let max_replicas = self.policy(agent_type).max_replicas;
        if pool.replicas.read().len() >= max_replicas as usize {
            return Err(ScalingError::PoolAtMax {
                agent_type,
                max_replicas,
            });
        }
        Ok(())
    }

    async fn provision_into(
        &self,
        pool: &AgentPool,
        agent_type: AgentType,
        region: &str,
    ) -> Result<AgentReplica, ScalingError> {
        let request = ProvisionRequest {
            replica_id: ReplicaId::generate(agent_type, region),
            agent_type,
            region: region.to_string(),
            max_capacity: agent_type.max_capacity(),
        };
        provision_with_retry(
            self.provisioner.as_ref(),
            &request,
            self.config.provision_attempts,
            Duration::from_millis(self.config.provision_timeout_ms),
            Duration::from_millis(self.config.provision_backoff_ms),
        )
        .await?;

        let replica = self.insert(pool, Replica::new(request.replica_id, agent_type, request.region))?;
        info!(replica = %replica.replica_id, %agent_type, region, "replica created");
        Ok(replica)
    }

    /// Provision a new healthy, idle replica and add it to the pool
    ///
    /// # Errors
    /// - `PoolAtMax` if the pool is already at `max_replicas`
    /// - `Provision` if every provisioning attempt failed (pool unchanged)
    #[instrument(skip(self))]
    pub async fn create_replica(&self, agent_type: AgentType, region: &str) -> Result<AgentReplica, ScalingError> {
        let pool = self.pool(agent_type);
        // held from the room check to the insert, shared with evaluate_scaling
        let _scaling = pool.scaling.lock().await;
        self.check_room(agent_type, &pool)?;
        self.provision_into(&pool, agent_type, region).await
    }

    /// Add already-running capacity under a known ID, without provisioning
    ///
    /// # Errors
    /// `DuplicateReplica` if the ID is taken.
    pub fn register_replica(
        &self,
        agent_type: AgentType,
        region: &str,
        replica_id: impl Into<String>,
    ) -> Result<AgentReplica, ScalingError> {
        let pool = self.pool(agent_type);
        let replica = Replica::new(ReplicaId(replica_id.into()), agent_type, region.to_string());
        let snapshot = self.insert(&pool, replica)?;
        debug!(replica = %snapshot.replica_id, %agent_type, region, "replica registered");
        Ok(snapshot)
    }

    /// Pick a replica for `work` using `strategy`
    ///
    /// # Errors
    /// `NoHealthyReplica` if no replica of the type is routable.
    pub fn select_replica(
        &self,
        agent_type: AgentType,
        work: &WorkItem,
        strategy: StrategyKind,
    ) -> Result<AgentReplica, ScalingError> {
        let pool = self.pool(agent_type);
        let candidates: Vec<AgentReplica> = pool
            .members()
            .iter()
            .filter(|r| r.is_routable())
            .map(|r| r.snapshot())
            .collect();
        if candidates.is_empty() {
            metrics::counter!("ira_no_healthy_replica_total", "agent_type" => agent_type.as_str()).increment(1);
            return Err(ScalingError::NoHealthyReplica { agent_type });
        }

        let strategy = strategy.strategy();
        let selection = strategy.select(&candidates, work, &pool.cursor);
        if selection.failover {
            self.failover_events.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ira_failover_events_total").increment(1);
            debug!(work = %work.work_id, region = ?work.region, "geographic routing failed over");
        }
        let chosen = candidates
            .into_iter()
            .nth(selection.index)
            .ok_or(ScalingError::NoHealthyReplica { agent_type })?;
        debug!(work = %work.work_id, replica = %chosen.replica_id, strategy = strategy.name(), "replica selected");
        Ok(chosen)
    }

    /// Select with the configured default strategy
    ///
    /// # Errors
    /// See [`Self::select_replica`].
    pub fn select_default(&self, agent_type: AgentType, work: &WorkItem) -> Result<AgentReplica, ScalingError> {
        self.select_replica(agent_type, work, self.config.default_strategy)
    }

    /// Record that `replica_id` now holds `work_id`; returns the new load
    ///
    /// # Errors
    /// `AtCapacity`, `DuplicateAssignment`, `ReplicaUnreachable`,
    /// `ReplicaDraining` or `UnknownReplica`.
    pub fn assign(&self, replica_id: &ReplicaId, work_id: &WorkId) -> Result<u32, ScalingError> {
        let replica = self.lookup(replica_id)?;
        let load = replica.try_assign(work_id)?;
        metrics::counter!("ira_assignments_total", "agent_type" => replica.agent_type.as_str()).increment(1);
        Ok(load)
    }

    /// Record that `replica_id` finished `work_id`; returns the new load
    ///
    /// # Errors
    /// `UnknownWork` or `UnknownReplica`.
    pub fn release(&self, replica_id: &ReplicaId, work_id: &WorkId) -> Result<u32, ScalingError> {
        self.lookup(replica_id)?.release(work_id)
    }

    /// Work held by a replica with its assignment time, oldest first
    ///
    /// # Errors
    /// `UnknownReplica`.
    pub fn active_work(&self, replica_id: &ReplicaId) -> Result<Vec<(WorkId, DateTime<Utc>)>, ScalingError> {
        Ok(self.lookup(replica_id)?.active_work())
    }

    /// Set health; `None` leaves the score unchanged
    ///
    /// # Errors
    /// `UnknownReplica`.
    pub fn update_health(
        &self,
        replica_id: &ReplicaId,
        status: ReplicaStatus,
        performance_score: Option<f64>,
    ) -> Result<AgentReplica, ScalingError> {
        let replica = self.lookup(replica_id)?;
        let previous = replica.status();
        replica.set_health(status, performance_score, None);
        if previous != status {
            info!(replica = %replica_id, from = ?previous, to = ?status, "replica health changed");
        }
        Ok(replica.snapshot())
    }

    /// Overwrite the full health record (status, score and simulated error rate)
    ///
    /// # Errors
    /// `UnknownReplica`.
    pub fn set_health_record(
        &self,
        replica_id: &ReplicaId,
        status: ReplicaStatus,
        performance_score: f64,
        error_rate: f64,
    ) -> Result<AgentReplica, ScalingError> {
        let replica = self.lookup(replica_id)?;
        replica.set_health(status, Some(performance_score), Some(error_rate));
        Ok(replica.snapshot())
    }

    /// Isolate or reconnect a replica
    ///
    /// # Errors
    /// `UnknownReplica`.
    pub fn set_reachable(&self, replica_id: &ReplicaId, reachable: bool) -> Result<(), ScalingError> {
        let replica = self.lookup(replica_id)?;
        replica.set_reachable(reachable);
        debug!(replica = %replica_id, reachable, "replica reachability changed");
        Ok(())
    }

    /// Replicas of one type, in pool order
    #[must_use]
    pub fn list_replicas(&self, agent_type: AgentType) -> Vec<AgentReplica> {
        self.pools
            .get(&agent_type)
            .map(|p| p.value().members().iter().map(|r| r.snapshot()).collect())
            .unwrap_or_default()
    }

    /// One replica
    #[must_use]
    pub fn replica(&self, replica_id: &ReplicaId) -> Option<AgentReplica> {
        self.index.get(replica_id).map(|r| r.value().snapshot())
    }

    /// Aggregate utilization for one type (0 for an empty pool)
    #[must_use]
    pub fn utilization(&self, agent_type: AgentType) -> f64 {
        self.pools.get(&agent_type).map_or(0.0, |p| {
            let (load, capacity, _) = p.value().totals();
            ratio(load, capacity)
        })
    }

    /// Apply the scaling policy for one agent type
    ///
    /// # Errors
    /// `Provision` if a scale-up could not add a single replica.
    #[instrument(skip(self))]
    pub async fn evaluate_scaling(&self, agent_type: AgentType) -> Result<ScalingAction, ScalingError> {
        let pool = self.pool(agent_type);
        let policy = self.policy(agent_type).clone();
        let mut state = pool.scaling.lock().await;
        let now = Instant::now();

        let (load, capacity, count) = pool.totals();
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let utilization = ratio(load, capacity);
        let cooldown_elapsed = state
            .last_action
            .map_or(true, |at| now.saturating_duration_since(at) >= policy.cooldown());

        let noop = |reason| Ok(ScalingAction::NoOp { agent_type, reason });

        if count < policy.min_replicas {
            state.below_since = None;
            let added = self.scale_up(&pool, agent_type, policy.min_replicas - count).await?;
            state.last_action = Some(now);
            return Ok(self.record_action(ScalingAction::ScaleUp { agent_type, added }, utilization));
        }

        if utilization >= policy.scale_up_threshold {
            state.below_since = None;
            if count >= policy.max_replicas {
                return noop(NoOpReason::AtMaxReplicas);
            }
            if !cooldown_elapsed {
                return noop(NoOpReason::Cooldown);
            }
            let wanted = policy.scale_up_increment.min(policy.max_replicas - count);
            let added = self.scale_up(&pool, agent_type, wanted).await?;
            state.last_action = Some(now);
            return Ok(self.record_action(ScalingAction::ScaleUp { agent_type, added }, utilization));
        }

        if utilization <= policy.scale_down_threshold {
            let below_since = *state.below_since.get_or_insert(now);
            if count <= policy.min_replicas {
                return noop(NoOpReason::AtMinReplicas);
            }
            if !cooldown_elapsed {
                return noop(NoOpReason::Cooldown);
            }
            if now.saturating_duration_since(below_since) < policy.cooldown() {
                return noop(NoOpReason::LowWaterNotSustained);
            }
            let wanted = policy.scale_down_increment.min(count - policy.min_replicas);
            let removed = self.scale_down(&pool, wanted).await;
            if removed.is_empty() {
                return noop(NoOpReason::NoIdleReplicas);
            }
            state.last_action = Some(now);
            state.below_since = None;
            return Ok(self.record_action(ScalingAction::ScaleDown { agent_type, removed }, utilization));
        }

        state.below_since = None;
        noop(NoOpReason::WithinBand)
    }

    fn record_action(&self, action: ScalingAction, utilization: f64) -> ScalingAction {
        self.scaling_actions.fetch_add(1, Ordering::Relaxed);
        match &action {
            ScalingAction::ScaleUp { agent_type, added } => {
                metrics::counter!("ira_scaling_actions_total", "direction" => "up").increment(1);
                info!(%agent_type, added = added.len(), utilization, "scaled up");
            }
            ScalingAction::ScaleDown { agent_type, removed } => {
                metrics::counter!("ira_scaling_actions_total", "direction" => "down").increment(1);
                info!(%agent_type, removed = removed.len(), utilization, "scaled down");
            }
            ScalingAction::NoOp { .. } => {}
        }
        action
    }

    /// Region with the fewest replicas of this type; ties go to config order
    fn least_populated_region(&self, pool: &AgentPool) -> String {
        let replicas = pool.replicas.read();
        self.config
            .regions
            .iter()
            .min_by_key(|region| replicas.iter().filter(|r| &r.region == *region).count())
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }

    async fn scale_up(&self, pool: &AgentPool, agent_type: AgentType, n: u32) -> Result<Vec<ReplicaId>, ScalingError> {
        let mut added = Vec::new();
        for _ in 0..n {
            let region = self.least_populated_region(pool);
            match self.provision_into(pool, agent_type, &region).await {
                Ok(replica) => added.push(replica.replica_id),
                Err(e) if added.is_empty() => return Err(e),
                Err(e) => {
                    warn!(%agent_type, added = added.len(), error = %e, "scale-up partially completed");
                    break;
                }
            }
        }
        Ok(added)
    }

    /// Remove up to `n` idle replicas, unhealthy and low performers first
    async fn scale_down(&self, pool: &AgentPool, n: u32) -> Vec<ReplicaId> {
        let mut candidates: Vec<Arc<Replica>> = pool.members().into_iter().filter(|r| r.load() == 0).collect();
        candidates.sort_by(|a, b| {
            let (sa, sb) = (a.snapshot(), b.snapshot());
            let rank = |s: ReplicaStatus| match s {
                ReplicaStatus::Unhealthy => 0,
                ReplicaStatus::Degraded => 1,
                ReplicaStatus::Healthy => 2,
            };
            rank(sa.status)
                .cmp(&rank(sb.status))
                .then(sa.performance_score.total_cmp(&sb.performance_score))
        });

        let mut drained = Vec::new();
        for replica in candidates {
            if drained.len() >= n as usize {
                break;
            }
            if replica.try_drain() {
                drained.push(replica);
            }
        }

        {
            let mut replicas = pool.replicas.write();
            replicas.retain(|r| !drained.iter().any(|d| Arc::ptr_eq(r, d)));
        }

        let mut removed = Vec::with_capacity(drained.len());
        for replica in drained {
            self.index.remove(&replica.id);
            let timeout = Duration::from_millis(self.config.provision_timeout_ms);
            match tokio::time::timeout(timeout, self.provisioner.decommission(&replica.id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(replica = %replica.id, error = %e, "decommission failed"),
                Err(_) => warn!(replica = %replica.id, "decommission timed out"),
            }
            removed.push(replica.id.clone());
        }
        removed
    }

    /// Add an incident to the throughput window
    pub fn record_incident(&self, incident_id: &str) {
        let now = Instant::now();
        let mut window = self.incidents.lock();
        window.push_back((now, incident_id.to_string()));
        Self::prune_incidents(&mut window, now, self.incident_window());
        metrics::counter!("ira_incidents_recorded_total").increment(1);
    }

    fn incident_window(&self) -> Duration {
        Duration::from_secs(self.config.incident_window_secs.max(1))
    }

    fn prune_incidents(window: &mut VecDeque<(Instant, String)>, now: Instant, span: Duration) {
        while let Some((at, _)) = window.front() {
            if now.saturating_duration_since(*at) > span {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Incidents per minute over the rolling window
    #[must_use]
    pub fn incidents_per_minute(&self) -> f64 {
        let now = Instant::now();
        let span = self.incident_window();
        let mut window = self.incidents.lock();
        Self::prune_incidents(&mut window, now, span);
        #[allow(clippy::cast_precision_loss)]
        let count = window.len() as f64;
        count * 60.0 / span.as_secs_f64()
    }

    /// Fold a latency sample into the region's moving average
    pub fn record_region_latency(&self, region: &str, latency_ms: f64) {
        let alpha = self.config.latency_alpha;
        self.region_latency
            .entry(region.to_string())
            .and_modify(|avg| *avg = alpha * latency_ms + (1.0 - alpha) * *avg)
            .or_insert(latency_ms);
    }

    /// Fleet-wide metrics
    #[must_use]
    pub fn get_metrics(&self) -> ScalingMetrics {
        let mut utilization = BTreeMap::new();
        let mut replica_counts = BTreeMap::new();
        let mut load_distribution = BTreeMap::new();
        for entry in &self.pools {
            let (load, capacity, count) = entry.value().totals();
            utilization.insert(*entry.key(), ratio(load, capacity));
            replica_counts.insert(*entry.key(), count);
            for replica in entry.value().members() {
                load_distribution.insert(replica.id.clone(), replica.assignments_total());
            }
        }
        ScalingMetrics {
            incidents_per_minute: self.incidents_per_minute(),
            utilization,
            replica_counts,
            scaling_actions: self.scaling_actions.load(Ordering::Relaxed),
            load_distribution,
            region_latency_ms: self
                .region_latency
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            failover_events: self.failover_events.load(Ordering::Relaxed),
        }
    }

    /// Evaluate every known pool each `autoscale_interval_ms` until shutdown
    pub fn spawn_autoscaler(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = Duration::from_millis(self.config.autoscale_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let agent_types: Vec<AgentType> = service.pools.iter().map(|e| *e.key()).collect();
                        for agent_type in agent_types {
                            if let Err(e) = service.evaluate_scaling(agent_type).await {
                                warn!(%agent_type, error = %e, "autoscaler evaluation failed");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("autoscaler stopped");
        })
    }
}
