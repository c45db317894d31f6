//! Incident control flow through the assembled core

use ira_breaker::{BreakerConfig, BreakerState};
use ira_core::prelude::*;
use ira_core::{agent_dependency, ConfigError};
use ira_events::IncidentStatus;
use ira_test_utils::{core_with_fleet, replica_ids, FailingAppendStore, ScriptedExecutor, Step};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

fn config() -> CoreConfig {
    CoreConfig::default().with_breaker(
        BreakerConfig::new()
            .with_failure_threshold(2)
            .with_cooldown_secs(5)
            .with_call_timeout_ms(1_000),
    )
}

#[tokio::test(start_paused = true)]
async fn failures_trip_the_agent_breaker_then_fail_fast() {
    let core = core_with_fleet(config(), AgentType::Diagnosis, &replica_ids("d", 2));
    let executor = ScriptedExecutor::new([Step::Fail("oom".into()), Step::Hang(Duration::from_secs(5))]);
    let incident = Incident::new("inc-1", "api errors", AgentType::Diagnosis);

    let first = core.handle_incident(&incident, &executor).await.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Dependency);
    let second = core.handle_incident(&incident, &executor).await.unwrap_err();
    assert_eq!(second.kind(), ErrorKind::Dependency);
    assert_eq!(
        core.breakers().state(&agent_dependency(AgentType::Diagnosis)),
        BreakerState::Open
    );

    let refused = core.handle_incident(&incident, &executor).await.unwrap_err();
    assert_eq!(refused.kind(), ErrorKind::FailFast);
    assert_eq!(executor.calls().len(), 2);

    // every attempt left a failure in the history and released its replica
    let state = core.events().replay_events(&incident.incident_id).await.unwrap();
    assert_eq!(state.failures.len(), 3);
    for replica in core.scaling().list_replicas(AgentType::Diagnosis) {
        assert_eq!(replica.current_load, 0);
    }

    tokio::time::advance(Duration::from_secs(6)).await;
    let report = core.handle_incident(&incident, &executor).await.unwrap();
    assert_eq!(report.version, state.version + 2);
    assert_eq!(
        core.breakers().state(&agent_dependency(AgentType::Diagnosis)),
        BreakerState::Closed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_phases_share_one_gapless_chain() {
    let config = CoreConfig {
        append_attempts: 64,
        ..config()
    };
    let core = Arc::new(core_with_fleet(config, AgentType::Detection, &replica_ids("det", 1)));
    for agent_type in &AgentType::ALL[1..] {
        core.scaling()
            .register_replica(*agent_type, "us-east-1", format!("{agent_type}-1"))
            .unwrap();
    }
    let executor = Arc::new(ScriptedExecutor::always_ok());

    let handles: Vec<_> = AgentType::ALL
        .into_iter()
        .map(|agent_type| {
            let core = Arc::clone(&core);
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let incident = Incident::new("inc-shared", "status page", agent_type);
                core.handle_incident(&incident, executor.as_ref()).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let id = IncidentId::from("inc-shared");
    let events = core.events().get_events(&id, 0).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.sequence_number).collect();
    assert_eq!(seqs, (1..=11).collect::<Vec<u64>>());
    // one created event, then assigned + completed per phase
    let state = core.events().replay_events(&id).await.unwrap();
    assert_eq!(state.assignments.len(), 5);
    assert_eq!(state.completed_phases.len(), 5);
    assert!(core.events().verify_integrity(&id).await.unwrap());
}

#[tokio::test]
async fn failed_agent_is_routed_around() {
    let core = core_with_fleet(CoreConfig::default(), AgentType::Detection, &replica_ids("a", 2));
    core.chaos()
        .inject(FaultType::AgentFailure, "a1", 60, 1.0)
        .unwrap();

    let executor = ScriptedExecutor::always_ok();
    for n in 0..4 {
        let incident = Incident::new(format!("inc-{n}"), "cpu spike", AgentType::Detection);
        let report = core.handle_incident(&incident, &executor).await.unwrap();
        assert_eq!(report.replica_id, ReplicaId::from("a2"));
    }
    core.shutdown().await;
    assert!(core
        .chaos()
        .list()
        .iter()
        .all(|e| e.status != ExperimentStatus::Active));
}

#[tokio::test]
async fn failed_assignment_record_releases_the_replica() {
    let core = ResilienceCore::with_event_store(
        CoreConfig::default(),
        Arc::new(InMemoryProvisioner::new()),
        Arc::new(FailingAppendStore::new(1)),
    )
    .unwrap();
    core.scaling()
        .register_replica(AgentType::Diagnosis, "us-east-1", "d1")
        .unwrap();
    let executor = ScriptedExecutor::always_ok();
    let incident = Incident::new("inc-3", "queue backlog", AgentType::Diagnosis);

    let err = core.handle_incident(&incident, &executor).await.unwrap_err();
    assert!(matches!(err, CoreError::Events(_)));
    assert!(executor.calls().is_empty());
    let replica = core.scaling().replica(&ReplicaId::from("d1")).unwrap();
    assert_eq!(replica.current_load, 0);
    assert!(core
        .scaling()
        .active_work(&replica.replica_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn resolution_closes_the_incident() {
    let core = core_with_fleet(CoreConfig::default(), AgentType::Resolution, &replica_ids("r", 1));
    let executor = ScriptedExecutor::new([Step::Resolve("rolled back deploy".into())]);
    let incident = Incident::new("inc-7", "bad deploy", AgentType::Resolution).with_severity(Severity::Critical);

    core.handle_incident(&incident, &executor).await.unwrap();
    let state = core.events().load_state(&incident.incident_id).await.unwrap();
    assert_eq!(state.status, IncidentStatus::Resolved);
    assert_eq!(state.resolution.as_deref(), Some("rolled back deploy"));
    assert_eq!(state.severity.as_deref(), Some("critical"));
    assert_eq!(state, core.events().replay_events(&incident.incident_id).await.unwrap());
}

#[test]
fn config_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
append_attempts = 7

[breaker]
failure_threshold = 4

[chaos]
ceiling_multiplier = 5
"#
    )
    .unwrap();
    let config = CoreConfig::load(file.path()).unwrap();
    assert_eq!(config.append_attempts, 7);
    assert_eq!(config.breaker.failure_threshold, 4);
    assert_eq!(config.chaos.ceiling_multiplier, 5);

    let err = CoreConfig::load("/nonexistent/ira.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn invalid_config_refuses_to_build() {
    let config = CoreConfig {
        append_attempts: 0,
        ..CoreConfig::default()
    };
    let err = ResilienceCore::new(config, Arc::new(InMemoryProvisioner::new())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
