//! End-to-end experiments on a paused clock

use ira_breaker::{BreakerConfig, BreakerRegistry, BreakerState};
use ira_chaos::prelude::*;
use ira_chaos::{impact, IssueKind, RecoveryAction};
use ira_scaling::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    scaling: Arc<ReplicaScalingService>,
    breakers: Arc<BreakerRegistry>,
    chaos: Arc<ChaosInjector>,
}

fn fixture(config: ChaosConfig) -> Fixture {
    let scaling = Arc::new(ReplicaScalingService::new(
        ScalingConfig::default(),
        Arc::new(InMemoryProvisioner::new()),
    ));
    for i in 1..=5 {
        scaling
            .register_replica(AgentType::Detection, "us-east-1", format!("a{i}"))
            .unwrap();
    }
    let breakers = Arc::new(BreakerRegistry::new(
        BreakerConfig::new()
            .with_failure_threshold(2)
            .with_cooldown_secs(5)
            .with_call_timeout_ms(500),
    ));
    breakers.breaker("postgres");
    let partitions = Arc::new(NetworkPartitionSimulator::new(Arc::clone(&scaling)));
    let chaos = Arc::new(ChaosInjector::new(
        config,
        Arc::clone(&scaling),
        Arc::clone(&breakers),
        partitions,
    ));
    Fixture {
        scaling,
        breakers,
        chaos,
    }
}

fn id(s: &str) -> ReplicaId {
    ReplicaId::from(s)
}

#[tokio::test(start_paused = true)]
async fn partitioned_minority_is_bypassed_then_reconciled() {
    let fx = fixture(ChaosConfig::default());
    fx.chaos.declare_peers("edge", [id("a1"), id("a2")]).unwrap();

    let exp = fx
        .chaos
        .inject(FaultType::NetworkPartition, "edge", 60, 1.0)
        .unwrap();
    let partition_id = exp.partition_id.clone().unwrap();
    let partitions = fx.chaos.partitions();

    // majority keeps serving
    for (n, target) in ["a3", "a4", "a5"].into_iter().enumerate() {
        let outcome = partitions
            .dispatch(&id(target), &WorkId::from(format!("w-major-{n}").as_str()))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered { load: 1 });
    }
    for n in 0..10 {
        let work = WorkItem::new(format!("probe-{n}"));
        let chosen = fx
            .scaling
            .select_replica(AgentType::Detection, &work, StrategyKind::RoundRobin)
            .unwrap();
        assert!(chosen.replica_id != id("a1") && chosen.replica_id != id("a2"));
    }

    // isolated side records the miss
    let outcome = partitions.dispatch(&id("a1"), &WorkId::from("w-iso")).unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Undeliverable {
            partition_id: partition_id.clone()
        }
    );
    let during = partitions.get(&partition_id).unwrap();
    assert_eq!(during.status, PartitionStatus::Active);
    assert!(during
        .state_consistency_issues
        .iter()
        .any(|i| i.kind == IssueKind::UndeliverableAssignment && i.replica_id == id("a1")));

    tokio::time::sleep(Duration::from_secs(62)).await;

    let healed = partitions.get(&partition_id).unwrap();
    assert_eq!(healed.status, PartitionStatus::Healed);
    assert!(!healed.healing_in_progress);
    assert!(healed.recovery_actions.contains(&RecoveryAction::Redelivered {
        work_id: WorkId::from("w-iso"),
        replica_id: id("a1"),
    }));
    assert!(fx.scaling.replica(&id("a1")).unwrap().reachable);
    assert_eq!(fx.scaling.replica(&id("a1")).unwrap().current_load, 1);

    let done = fx.chaos.get(&exp.experiment_id).unwrap();
    assert_eq!(done.status, ExperimentStatus::Recovered);
    assert!(done.recovery_observed);
    assert!((done.impact_metrics[impact::ERROR_RATE] - 0.4).abs() < 1e-9);
    assert_eq!(done.impact_metrics[impact::AFFECTED_COMPONENTS], 2.0);
}

#[tokio::test(start_paused = true)]
async fn database_fault_trips_breaker_and_recovers_with_traffic() {
    let fx = fixture(ChaosConfig::default());
    let exp = fx
        .chaos
        .inject(FaultType::DatabaseFailure, "postgres", 10, 1.0)
        .unwrap();

    let mut saw_open = false;
    for _ in 0..25 {
        let _ = fx.breakers.call("postgres", || async { Ok::<_, ()>(()) }).await;
        saw_open |= fx.breakers.state("postgres") == BreakerState::Open;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(saw_open);
    assert_eq!(fx.breakers.state("postgres"), BreakerState::Closed);

    let done = fx.chaos.get(&exp.experiment_id).unwrap();
    assert_eq!(done.status, ExperimentStatus::Recovered);
    assert!(done.impact_metrics[impact::REJECTED_CALLS] > 0.0);
    assert!(done.impact_metrics.contains_key(impact::TIME_TO_DETECT_SECS));
    assert!(done.impact_metrics.contains_key(impact::TIME_TO_RECOVER_SECS));
}

#[tokio::test(start_paused = true)]
async fn replica_lost_during_experiment_escalates() {
    let fx = fixture(ChaosConfig::default());
    let exp = fx.chaos.inject(FaultType::CpuOverload, "a3", 20, 0.5).unwrap();

    // reachability is not part of the fault, so the revert cannot restore it
    tokio::time::sleep(Duration::from_secs(5)).await;
    fx.scaling.set_reachable(&id("a3"), false).unwrap();
    assert_eq!(
        fx.chaos.get(&exp.experiment_id).unwrap().status,
        ExperimentStatus::Active
    );

    tokio::time::sleep(Duration::from_secs(56)).await;
    let done = fx.chaos.get(&exp.experiment_id).unwrap();
    assert_eq!(done.status, ExperimentStatus::Escalated);
    assert!(!done.acknowledged);

    let dash = fx.chaos.dashboard();
    assert_eq!(dash.escalated_count, 1);
    assert_eq!(dash.unhealthy_components, 1);
    assert!((dash.resilience_score - 0.65).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn active_limit_and_overlapping_targets_are_rejected() {
    let fx = fixture(ChaosConfig::new().with_max_active_experiments(2));
    fx.chaos.declare_peers("pair", [id("a1"), id("a2")]).unwrap();

    fx.chaos.inject(FaultType::AgentFailure, "a2", 30, 1.0).unwrap();
    let busy = fx
        .chaos
        .inject(FaultType::NetworkPartition, "pair", 30, 1.0)
        .unwrap_err();
    assert!(matches!(busy, ChaosError::TargetBusy { ref target, .. } if target == "a2"));
    // a rejected group claim leaves its other members free
    fx.chaos.inject(FaultType::MemoryPressure, "a1", 30, 0.2).unwrap();

    let limited = fx
        .chaos
        .inject(FaultType::ServiceTimeout, "postgres", 30, 1.0)
        .unwrap_err();
    assert_eq!(limited, ChaosError::TooManyActive { limit: 2 });
    assert!(limited.is_rejected_request());

    assert_eq!(fx.chaos.stop_all(), 2);
    assert_eq!(fx.chaos.dashboard().active.len(), 2);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let dash = fx.chaos.dashboard();
    assert!(dash.active.is_empty());
    assert_eq!(dash.completed.len(), 2);
    assert!((dash.resilience_score - 1.0).abs() < 1e-9);
}
