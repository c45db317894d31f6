//! Chaos fault injector
//!
//! Each experiment runs a monitor task with two phases:
//! 1. fault window: the fault stays applied until `duration_seconds`
//!    elapses or [`ChaosInjector::stop`] is called
//! 2. recovery watch: the fault is reverted and the target is polled until
//!    it is back at baseline, or escalated at `ceiling_multiplier × duration`
//!
//! The monitor holds an `Arc` to the injector, so experiments finish even
//! when nobody is watching them.

use crate::config::ChaosConfig;
use crate::error::ChaosError;
use crate::partition::NetworkPartitionSimulator;
use crate::types::{
    impact, ChaosDashboard, ChaosExperiment, ExperimentId, ExperimentStatus, FaultType, PartitionId, PartitionStatus,
    RecoveryReport,
};
use chrono::Utc;
use dashmap::DashMap;
use ira_breaker::{BreakerCounters, BreakerRegistry, BreakerState, FaultSpec};
use ira_scaling::{AgentReplica, AgentType, ReplicaId, ReplicaScalingService, ReplicaStatus};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// What an experiment changed, with enough to undo it
#[derive(Debug)]
enum AppliedFault {
    /// Replica health overwritten; holds pre-fault snapshots
    Replicas(Vec<AgentReplica>),
    /// Breaker fault hook installed
    Dependency { name: String, baseline: BreakerCounters },
    /// Partition started
    Partition(PartitionId),
}

#[derive(Debug)]
enum Target {
    Replicas(Vec<ReplicaId>),
    Dependency(String),
}

#[derive(Debug)]
struct ExperimentRecord {
    experiment: ChaosExperiment,
    applied: AppliedFault,
    claims: Vec<String>,
    started: Instant,
    detected: Option<Instant>,
    reverted: Option<Instant>,
    recovered: Option<Instant>,
    stop: Arc<Notify>,
}

/// Starts, tracks and reverts fault experiments
#[derive(Debug)]
pub struct ChaosInjector {
    config: ChaosConfig,
    scaling: Arc<ReplicaScalingService>,
    breakers: Arc<BreakerRegistry>,
    partitions: Arc<NetworkPartitionSimulator>,
    peers: DashMap<String, Vec<ReplicaId>>,
    experiments: DashMap<ExperimentId, Arc<Mutex<ExperimentRecord>>>,
    busy: DashMap<String, ExperimentId>,
    /// Held from the active-limit check until the experiment is registered
    admission: Mutex<()>,
}

impl ChaosInjector {
    /// Create injector over the fleet and its breakers
    #[must_use]
    pub fn new(
        config: ChaosConfig,
        scaling: Arc<ReplicaScalingService>,
        breakers: Arc<BreakerRegistry>,
        partitions: Arc<NetworkPartitionSimulator>,
    ) -> Self {
        Self {
            config,
            scaling,
            breakers,
            partitions,
            peers: DashMap::new(),
            experiments: DashMap::new(),
            busy: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Partition simulator used for `network_partition` experiments
    #[inline]
    #[must_use]
    pub fn partitions(&self) -> &Arc<NetworkPartitionSimulator> {
        &self.partitions
    }

    /// Name a group of replicas so experiments can target it as a whole
    ///
    /// # Errors
    /// `UnknownTarget` for the first member not in the replica registry.
    pub fn declare_peers<I>(&self, group: impl Into<String>, members: I) -> Result<(), ChaosError>
    where
        I: IntoIterator<Item = ReplicaId>,
    {
        let members: Vec<ReplicaId> = members.into_iter().collect();
        if let Some(missing) = members.iter().find(|m| self.scaling.replica(m).is_none()) {
            return Err(ChaosError::UnknownTarget(missing.to_string()));
        }
        self.peers.insert(group.into(), members);
        Ok(())
    }

    fn resolve(&self, target: &str) -> Result<Target, ChaosError> {
        if let Some(members) = self.peers.get(target) {
            return Ok(Target::Replicas(members.value().clone()));
        }
        let replica_id = ReplicaId::from(target);
        if self.scaling.replica(&replica_id).is_some() {
            return Ok(Target::Replicas(vec![replica_id]));
        }
        if self.breakers.get(target).is_some() {
            return Ok(Target::Dependency(target.to_string()));
        }
        Err(ChaosError::UnknownTarget(target.to_string()))
    }

    /// Start an experiment and apply its fault immediately
    ///
    /// # Errors
    /// - `InvalidExperiment` for an out-of-range duration or intensity
    /// - `TooManyActive` when the active limit is reached
    /// - `UnknownTarget` / `IncompatibleTarget` / `TargetBusy`
    /// - `Partition` if a `network_partition` could not start
    #[instrument(skip(self))]
    pub fn inject(
        self: &Arc<Self>,
        fault_type: FaultType,
        target_component: &str,
        duration_seconds: u64,
        intensity: f64,
    ) -> Result<ChaosExperiment, ChaosError> {
        if !(0.0..=1.0).contains(&intensity) {
            return Err(ChaosError::InvalidExperiment(format!("intensity {intensity} outside 0..=1")));
        }
        if duration_seconds == 0 || duration_seconds > self.config.max_duration_secs {
            return Err(ChaosError::InvalidExperiment(format!(
                "duration {duration_seconds}s outside 1..={}",
                self.config.max_duration_secs
            )));
        }
        let admission = self.admission.lock();
        let active = self.count_with(|s| s == ExperimentStatus::Active);
        if active >= self.config.max_active_experiments {
            return Err(ChaosError::TooManyActive {
                limit: self.config.max_active_experiments,
            });
        }

        let target = self.resolve(target_component)?;
        let experiment_id = ExperimentId::generate();
        let claims = match &target {
            Target::Replicas(ids) => ids.iter().map(ToString::to_string).collect(),
            Target::Dependency(name) => vec![name.clone()],
        };
        self.claim(&claims, &experiment_id)?;

        let applied = match self.apply(fault_type, target_component, &target, duration_seconds, intensity) {
            Ok(applied) => applied,
            Err(e) => {
                self.release(&claims);
                return Err(e);
            }
        };

        let experiment = ChaosExperiment {
            experiment_id: experiment_id.clone(),
            fault_type,
            target_component: target_component.to_string(),
            duration_seconds,
            intensity,
            start_time: Utc::now(),
            end_time: None,
            recovery_observed: false,
            status: ExperimentStatus::Active,
            acknowledged: false,
            partition_id: match &applied {
                AppliedFault::Partition(id) => Some(id.clone()),
                _ => None,
            },
            impact_metrics: BTreeMap::new(),
        };
        let started = Instant::now();
        let stop = Arc::new(Notify::new());
        let record = ExperimentRecord {
            experiment: experiment.clone(),
            applied,
            claims,
            started,
            detected: None,
            reverted: None,
            recovered: None,
            stop: Arc::clone(&stop),
        };
        self.experiments
            .insert(experiment_id.clone(), Arc::new(Mutex::new(record)));
        drop(admission);

        let window = Duration::from_secs(duration_seconds);
        let ceiling = window * self.config.ceiling_multiplier;
        let injector = Arc::clone(self);
        let id = experiment_id.clone();
        tokio::spawn(async move { injector.monitor(id, stop, started, window, ceiling).await });

        metrics::counter!("ira_chaos_experiments_total", "fault_type" => fault_type.as_str()).increment(1);
        info!(experiment = %experiment_id, %fault_type, target = target_component, duration_seconds, intensity, "chaos experiment started");
        Ok(experiment)
    }

    fn claim(&self, claims: &[String], experiment_id: &ExperimentId) -> Result<(), ChaosError> {
        let mut taken = Vec::with_capacity(claims.len());
        for key in claims {
            match self.busy.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(held) => {
                    let err = ChaosError::TargetBusy {
                        target: key.clone(),
                        experiment_id: held.get().clone(),
                    };
                    drop(held);
                    self.release(&taken);
                    return Err(err);
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(experiment_id.clone());
                    taken.push(key.clone());
                }
            }
        }
        Ok(())
    }

    fn release(&self, claims: &[String]) {
        for key in claims {
            self.busy.remove(key);
        }
    }

    fn apply(
        &self,
        fault_type: FaultType,
        target_component: &str,
        target: &Target,
        duration_seconds: u64,
        intensity: f64,
    ) -> Result<AppliedFault, ChaosError> {
        match target {
            Target::Dependency(name) if fault_type.targets_dependency() => {
                let spec = if fault_type == FaultType::ServiceTimeout {
                    FaultSpec::hang(intensity)
                } else {
                    FaultSpec::error(intensity)
                };
                Ok(self.apply_dependency(name, spec))
            }
            Target::Replicas(ids) if fault_type == FaultType::NetworkPartition => {
                let partition = self.partitions.partition(ids.iter().cloned(), duration_seconds)?;
                Ok(AppliedFault::Partition(partition.partition_id))
            }
            Target::Replicas(ids) if !fault_type.targets_dependency() => {
                let baselines = ids
                    .iter()
                    .map(|id| {
                        self.scaling
                            .replica(id)
                            .ok_or_else(|| ChaosError::UnknownTarget(id.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                for baseline in &baselines {
                    if fault_type == FaultType::AgentFailure {
                        self.scaling.set_health_record(
                            &baseline.replica_id,
                            ReplicaStatus::Unhealthy,
                            baseline.performance_score,
                            intensity,
                        )?;
                    } else {
                        self.scaling.set_health_record(
                            &baseline.replica_id,
                            ReplicaStatus::Degraded,
                            baseline.performance_score * (1.0 - intensity),
                            baseline.error_rate,
                        )?;
                    }
                }
                Ok(AppliedFault::Replicas(baselines))
            }
            _ => Err(ChaosError::IncompatibleTarget {
                fault_type,
                target: target_component.to_string(),
            }),
        }
    }

    fn apply_dependency(&self, name: &str, spec: FaultSpec) -> AppliedFault {
        let baseline = self.breakers.breaker(name).snapshot().counters;
        self.breakers.inject_fault(name, spec);
        AppliedFault::Dependency {
            name: name.to_string(),
            baseline,
        }
    }

    async fn monitor(
        self: Arc<Self>,
        experiment_id: ExperimentId,
        stop: Arc<Notify>,
        started: Instant,
        window: Duration,
        ceiling: Duration,
    ) {
        let mut poll = tokio::time::interval(self.config.recovery_poll());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let revert_at = started + window;
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.observe(&experiment_id) {
                        return;
                    }
                }
                () = tokio::time::sleep_until(revert_at) => break,
                () = stop.notified() => break,
            }
        }
        self.revert(&experiment_id);

        let ceiling_at = started + ceiling;
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.observe(&experiment_id) {
                        return;
                    }
                }
                () = tokio::time::sleep_until(ceiling_at) => {
                    self.escalate(&experiment_id);
                    return;
                }
            }
        }
    }

    fn record(&self, experiment_id: &ExperimentId) -> Result<Arc<Mutex<ExperimentRecord>>, ChaosError> {
        self.experiments
            .get(experiment_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ChaosError::UnknownExperiment(experiment_id.clone()))
    }

    /// Sample the target; returns true once the experiment is finished
    fn observe(&self, experiment_id: &ExperimentId) -> bool {
        let Ok(record) = self.record(experiment_id) else {
            return true;
        };
        let mut record = record.lock();
        self.observe_locked(&mut record)
    }

    fn observe_locked(&self, record: &mut ExperimentRecord) -> bool {
        if record.experiment.status.is_terminal() {
            return true;
        }
        let healthy = self.target_healthy(&record.applied);
        if !healthy && record.detected.is_none() {
            record.detected = Some(Instant::now());
            debug!(experiment = %record.experiment.experiment_id, "fault observed");
        }
        if record.experiment.status == ExperimentStatus::Recovering && healthy {
            record.recovered = Some(Instant::now());
            self.finish(record, ExperimentStatus::Recovered);
            return true;
        }
        false
    }

    fn target_healthy(&self, applied: &AppliedFault) -> bool {
        match applied {
            AppliedFault::Replicas(baselines) => baselines.iter().all(|baseline| {
                self.scaling.replica(&baseline.replica_id).is_some_and(|r| {
                    r.reachable && (r.status == ReplicaStatus::Healthy || r.status == baseline.status)
                })
            }),
            AppliedFault::Dependency { name, .. } => self.breakers.state(name) == BreakerState::Closed,
            AppliedFault::Partition(partition_id) => self
                .partitions
                .get(partition_id)
                .is_some_and(|p| p.status == PartitionStatus::Healed),
        }
    }

    fn revert(&self, experiment_id: &ExperimentId) {
        let Ok(record) = self.record(experiment_id) else {
            return;
        };
        let mut record = record.lock();
        if record.experiment.status != ExperimentStatus::Active {
            return;
        }
        match &record.applied {
            AppliedFault::Replicas(baselines) => {
                for b in baselines {
                    if let Err(e) =
                        self.scaling
                            .set_health_record(&b.replica_id, b.status, b.performance_score, b.error_rate)
                    {
                        warn!(experiment = %experiment_id, replica = %b.replica_id, error = %e, "replica gone before revert");
                    }
                }
            }
            AppliedFault::Dependency { name, .. } => {
                self.breakers.clear_fault(name);
            }
            AppliedFault::Partition(partition_id) => {
                if let Err(e) = self.partitions.heal(partition_id) {
                    warn!(experiment = %experiment_id, error = %e, "partition did not heal on revert");
                }
            }
        }
        record.reverted = Some(Instant::now());
        record.experiment.status = ExperimentStatus::Recovering;
        info!(experiment = %experiment_id, "chaos fault reverted");
    }

    fn escalate(&self, experiment_id: &ExperimentId) {
        let Ok(record) = self.record(experiment_id) else {
            return;
        };
        let mut record = record.lock();
        if !record.experiment.status.is_terminal() {
            self.finish(&mut record, ExperimentStatus::Escalated);
        }
    }

    fn finish(&self, record: &mut ExperimentRecord, status: ExperimentStatus) {
        record.experiment.status = status;
        record.experiment.end_time = Some(Utc::now());
        record.experiment.recovery_observed = status == ExperimentStatus::Recovered;
        record.experiment.impact_metrics = self.impact(record);
        self.release(&record.claims);

        let experiment = &record.experiment;
        if status == ExperimentStatus::Escalated {
            metrics::counter!("ira_chaos_escalations_total").increment(1);
            error!(
                experiment = %experiment.experiment_id,
                fault_type = %experiment.fault_type,
                target = %experiment.target_component,
                "target did not recover before ceiling; manual intervention required"
            );
        } else {
            metrics::counter!("ira_chaos_recoveries_total").increment(1);
            info!(experiment = %experiment.experiment_id, "chaos target recovered");
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn impact(&self, record: &ExperimentRecord) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        let (affected, error_rate, rejected) = match &record.applied {
            AppliedFault::Replicas(baselines) => {
                let rate = if record.experiment.fault_type == FaultType::AgentFailure {
                    record.experiment.intensity
                } else {
                    0.0
                };
                (baselines.len(), rate, 0)
            }
            AppliedFault::Dependency { name, baseline } => {
                let now = self.breakers.get(name).map(|b| b.snapshot().counters).unwrap_or_default();
                let calls = now.calls.saturating_sub(baseline.calls);
                let failures = now.failures.saturating_sub(baseline.failures);
                let rejected = now.rejections.saturating_sub(baseline.rejections);
                let attempted = calls + rejected;
                let rate = if attempted == 0 {
                    0.0
                } else {
                    (failures + rejected) as f64 / attempted as f64
                };
                (1, rate, rejected)
            }
            AppliedFault::Partition(partition_id) => {
                // fraction of the fleet that could not be reached
                let isolated = self.partitions.get(partition_id).map_or(0, |p| p.affected_agents.len());
                let fleet: usize = AgentType::ALL.iter().map(|t| self.scaling.list_replicas(*t).len()).sum();
                let rate = if fleet == 0 { 0.0 } else { isolated as f64 / fleet as f64 };
                (isolated, rate, 0)
            }
        };
        out.insert(impact::AFFECTED_COMPONENTS.to_string(), affected as f64);
        out.insert(impact::ERROR_RATE.to_string(), error_rate);
        out.insert(impact::REJECTED_CALLS.to_string(), rejected as f64);
        if let Some(detected) = record.detected {
            out.insert(
                impact::TIME_TO_DETECT_SECS.to_string(),
                detected.saturating_duration_since(record.started).as_secs_f64(),
            );
        }
        if let (Some(reverted), Some(recovered)) = (record.reverted, record.recovered) {
            out.insert(
                impact::TIME_TO_RECOVER_SECS.to_string(),
                recovered.saturating_duration_since(reverted).as_secs_f64(),
            );
        }
        out
    }

    /// End an experiment's fault window now; the recovery watch continues
    ///
    /// # Errors
    /// `UnknownExperiment`.
    pub fn stop(&self, experiment_id: &ExperimentId) -> Result<ChaosExperiment, ChaosError> {
        let record = self.record(experiment_id)?;
        self.revert(experiment_id);
        let record = record.lock();
        record.stop.notify_one();
        Ok(record.experiment.clone())
    }

    /// Stop every experiment still holding a fault
    pub fn stop_all(&self) -> usize {
        let active: Vec<ExperimentId> = self
            .experiments
            .iter()
            .filter(|r| r.value().lock().experiment.status == ExperimentStatus::Active)
            .map(|r| r.key().clone())
            .collect();
        for id in &active {
            if let Err(e) = self.stop(id) {
                warn!(experiment = %id, error = %e, "stop failed");
            }
        }
        active.len()
    }

    /// Check whether the target is back at baseline and refresh impact
    ///
    /// # Errors
    /// `UnknownExperiment`.
    pub fn evaluate_recovery(&self, experiment_id: &ExperimentId) -> Result<RecoveryReport, ChaosError> {
        let record = self.record(experiment_id)?;
        let mut record = record.lock();
        self.observe_locked(&mut record);
        if !record.experiment.status.is_terminal() {
            record.experiment.impact_metrics = self.impact(&record);
        }
        Ok(RecoveryReport {
            experiment_id: experiment_id.clone(),
            status: record.experiment.status,
            target_healthy: self.target_healthy(&record.applied),
            recovery_observed: record.experiment.recovery_observed,
            impact_metrics: record.experiment.impact_metrics.clone(),
            evaluated_at: Utc::now(),
        })
    }

    /// Mark an escalation as seen by an operator
    ///
    /// # Errors
    /// `UnknownExperiment`; `InvalidExperiment` if it is not escalated.
    pub fn acknowledge(&self, experiment_id: &ExperimentId) -> Result<ChaosExperiment, ChaosError> {
        let record = self.record(experiment_id)?;
        let mut record = record.lock();
        if record.experiment.status != ExperimentStatus::Escalated {
            return Err(ChaosError::InvalidExperiment(format!(
                "{experiment_id} is {:?}, not escalated",
                record.experiment.status
            )));
        }
        record.experiment.acknowledged = true;
        info!(experiment = %experiment_id, "escalation acknowledged");
        Ok(record.experiment.clone())
    }

    /// One experiment
    #[must_use]
    pub fn get(&self, experiment_id: &ExperimentId) -> Option<ChaosExperiment> {
        self.experiments
            .get(experiment_id)
            .map(|r| r.value().lock().experiment.clone())
    }

    /// Every experiment, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<ChaosExperiment> {
        let mut all: Vec<ChaosExperiment> = self
            .experiments
            .iter()
            .map(|r| r.value().lock().experiment.clone())
            .collect();
        all.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.experiment_id.cmp(&b.experiment_id))
        });
        all
    }

    fn count_with(&self, pred: impl Fn(ExperimentStatus) -> bool) -> usize {
        self.experiments
            .iter()
            .filter(|r| pred(r.value().lock().experiment.status))
            .count()
    }

    /// Active and completed experiments with a resilience score
    #[must_use]
    pub fn dashboard(&self) -> ChaosDashboard {
        let (active, completed): (Vec<ChaosExperiment>, Vec<ChaosExperiment>) =
            self.list().into_iter().partition(|e| !e.status.is_terminal());
        let escalated_count = completed
            .iter()
            .filter(|e| e.status == ExperimentStatus::Escalated && !e.acknowledged)
            .count();

        let unhealthy_replicas: usize = AgentType::ALL
            .iter()
            .flat_map(|t| self.scaling.list_replicas(*t))
            .filter(|r| r.status == ReplicaStatus::Unhealthy || !r.reachable)
            .count();
        let open_breakers = self
            .breakers
            .dashboard()
            .dependencies
            .iter()
            .filter(|d| d.state == BreakerState::Open)
            .count();
        let unhealthy_components = unhealthy_replicas + open_breakers;

        let resilience_score = resilience_score(active.len(), unhealthy_components, escalated_count);
        metrics::gauge!("ira_chaos_resilience_score").set(resilience_score);
        ChaosDashboard {
            active,
            completed,
            escalated_count,
            unhealthy_components,
            resilience_score,
        }
    }
}

/// `1 − (0.15·active + 0.10·unhealthy + 0.25·escalated)`, floored at zero
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn resilience_score(active: usize, unhealthy: usize, escalated: usize) -> f64 {
    let penalty = 0.15 * active as f64 + 0.10 * unhealthy as f64 + 0.25 * escalated as f64;
    (1.0 - penalty).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ira_breaker::BreakerConfig;
    use ira_scaling::{InMemoryProvisioner, ScalingConfig};
    use pretty_assertions::assert_eq;

    fn injector() -> (Arc<ReplicaScalingService>, Arc<BreakerRegistry>, Arc<ChaosInjector>) {
        let scaling = Arc::new(ReplicaScalingService::new(
            ScalingConfig::default(),
            Arc::new(InMemoryProvisioner::new()),
        ));
        for id in ["r1", "r2"] {
            scaling.register_replica(AgentType::Detection, "us-east-1", id).unwrap();
        }
        let breakers = Arc::new(BreakerRegistry::new(
            BreakerConfig::new().with_failure_threshold(2).with_cooldown_secs(5),
        ));
        breakers.breaker("postgres");
        let partitions = Arc::new(NetworkPartitionSimulator::new(Arc::clone(&scaling)));
        let injector = Arc::new(ChaosInjector::new(
            ChaosConfig::default(),
            Arc::clone(&scaling),
            Arc::clone(&breakers),
            partitions,
        ));
        (scaling, breakers, injector)
    }

    #[test]
    fn score_penalties() {
        assert!((resilience_score(0, 0, 0) - 1.0).abs() < 1e-9);
        assert!((resilience_score(1, 2, 0) - 0.65).abs() < 1e-9);
        assert!(resilience_score(4, 4, 4).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_bad_requests() {
        let (_, _, injector) = injector();
        let err = injector.inject(FaultType::AgentFailure, "r1", 10, 1.5).unwrap_err();
        assert!(matches!(err, ChaosError::InvalidExperiment(_)));
        let err = injector.inject(FaultType::AgentFailure, "r1", 0, 0.5).unwrap_err();
        assert!(matches!(err, ChaosError::InvalidExperiment(_)));
        let err = injector.inject(FaultType::AgentFailure, "nope", 10, 0.5).unwrap_err();
        assert_eq!(err, ChaosError::UnknownTarget("nope".to_string()));
        let err = injector.inject(FaultType::DatabaseFailure, "r1", 10, 0.5).unwrap_err();
        assert!(matches!(err, ChaosError::IncompatibleTarget { .. }));
        let err = injector.inject(FaultType::AgentFailure, "postgres", 10, 0.5).unwrap_err();
        assert!(matches!(err, ChaosError::IncompatibleTarget { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_injections_respect_the_active_limit() {
        let scaling = Arc::new(ReplicaScalingService::new(
            ScalingConfig::default(),
            Arc::new(InMemoryProvisioner::new()),
        ));
        let ids: Vec<String> = (0..8).map(|i| format!("c{i}")).collect();
        for id in &ids {
            scaling.register_replica(AgentType::Detection, "us-east-1", id.as_str()).unwrap();
        }
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::new()));
        let partitions = Arc::new(NetworkPartitionSimulator::new(Arc::clone(&scaling)));
        let injector = Arc::new(ChaosInjector::new(
            ChaosConfig::default().with_max_active_experiments(2),
            scaling,
            breakers,
            partitions,
        ));

        let barrier = Arc::new(tokio::sync::Barrier::new(ids.len()));
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let injector = Arc::clone(&injector);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    injector.inject(FaultType::AgentFailure, &id, 60, 1.0)
                })
            })
            .collect();
        let mut started = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => started += 1,
                Err(e) => assert!(matches!(e, ChaosError::TooManyActive { limit: 2 })),
            }
        }
        assert_eq!(started, 2);
        assert_eq!(injector.dashboard().active.len(), 2);
        assert_eq!(injector.stop_all(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_failure_marks_unhealthy_then_recovers() {
        let (scaling, _, injector) = injector();
        let exp = injector.inject(FaultType::AgentFailure, "r1", 30, 0.6).unwrap();
        let r1 = scaling.replica(&ReplicaId::from("r1")).unwrap();
        assert_eq!(r1.status, ReplicaStatus::Unhealthy);
        assert!((r1.error_rate - 0.6).abs() < 1e-9);

        let busy = injector.inject(FaultType::CpuOverload, "r1", 30, 0.5).unwrap_err();
        assert!(matches!(busy, ChaosError::TargetBusy { .. }));

        tokio::time::sleep(Duration::from_secs(32)).await;
        let done = injector.get(&exp.experiment_id).unwrap();
        assert_eq!(done.status, ExperimentStatus::Recovered);
        assert!(done.recovery_observed);
        assert!(done.end_time.is_some());
        assert!(done.impact_metrics[impact::TIME_TO_DETECT_SECS] < 1.0);
        assert!(done.impact_metrics.contains_key(impact::TIME_TO_RECOVER_SECS));
        assert_eq!(scaling.replica(&ReplicaId::from("r1")).unwrap().status, ReplicaStatus::Healthy);

        // target free again
        injector.inject(FaultType::CpuOverload, "r1", 5, 0.5).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pressure_reduces_performance() {
        let (scaling, _, injector) = injector();
        injector.inject(FaultType::MemoryPressure, "r2", 30, 0.4).unwrap();
        let r2 = scaling.replica(&ReplicaId::from("r2")).unwrap();
        assert_eq!(r2.status, ReplicaStatus::Degraded);
        assert!((r2.performance_score - 0.6).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_reverts_early() {
        let (scaling, _, injector) = injector();
        let exp = injector.inject(FaultType::AgentFailure, "r2", 600, 1.0).unwrap();
        let stopped = injector.stop(&exp.experiment_id).unwrap();
        assert_eq!(stopped.status, ExperimentStatus::Recovering);
        assert_eq!(scaling.replica(&ReplicaId::from("r2")).unwrap().status, ReplicaStatus::Healthy);

        let report = injector.evaluate_recovery(&exp.experiment_id).unwrap();
        assert!(report.target_healthy);
        assert!(report.recovery_observed);
        assert_eq!(report.status, ExperimentStatus::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_that_never_recovers_escalates() {
        let (_, breakers, injector) = injector();
        let exp = injector.inject(FaultType::DatabaseFailure, "postgres", 10, 1.0).unwrap();
        for _ in 0..3 {
            let _ = breakers.call("postgres", || async { Ok::<_, ()>(()) }).await;
        }
        assert_eq!(breakers.state("postgres"), BreakerState::Open);

        // no traffic after the window, so the breaker never probes closed
        tokio::time::sleep(Duration::from_secs(31)).await;
        let done = injector.get(&exp.experiment_id).unwrap();
        assert_eq!(done.status, ExperimentStatus::Escalated);
        assert!(!done.recovery_observed);
        assert_eq!(done.impact_metrics[impact::REJECTED_CALLS], 1.0);
        assert!((done.impact_metrics[impact::ERROR_RATE] - 1.0).abs() < 1e-9);

        let dash = injector.dashboard();
        assert_eq!(dash.escalated_count, 1);
        injector.acknowledge(&exp.experiment_id).unwrap();
        assert_eq!(injector.dashboard().escalated_count, 0);
    }
}
