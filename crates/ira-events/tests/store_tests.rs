//! Event store integration tests
//!
//! Concurrent appenders, cross-region repair and snapshot/replay agreement.

use ira_events::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

fn note(n: usize) -> NewEvent {
    NewEvent::new("note", json!({ "n": n }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_get_each_version_once() {
    let store = Arc::new(InMemoryEventStore::default());
    let id = IncidentId::from("inc-race");
    let writers = 32;

    let mut handles = Vec::new();
    for n in 0..writers {
        let store = Arc::clone(&store);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            append_with_retry(store.as_ref(), &id, note(n), 1_000).await
        }));
    }

    let mut versions = BTreeSet::new();
    for handle in handles {
        let version = handle.await.unwrap().unwrap();
        assert!(versions.insert(version), "version {version} handed out twice");
    }

    assert_eq!(versions, (1..=writers as u64).collect::<BTreeSet<_>>());
    assert_eq!(store.get_current_version(&id).await.unwrap(), writers as u64);
    assert!(store.verify_integrity(&id).await.unwrap());
}

#[tokio::test]
async fn test_exact_version_race_has_one_winner() {
    let store = InMemoryEventStore::default();
    let id = IncidentId::from("inc-1");
    store.append_event(&id, note(0), ExpectedVersion::Any).await.unwrap();

    let first = store.append_event(&id, note(1), ExpectedVersion::Exact(1)).await;
    let second = store.append_event(&id, note(2), ExpectedVersion::Exact(1)).await;

    assert_eq!(first.unwrap(), 2);
    assert!(second.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_repair_from_replica_restores_chain() {
    let primary = InMemoryEventStore::default();
    let replica = Arc::new(InMemoryEventStore::default());
    let id = IncidentId::from("inc-7");

    for n in 0..5 {
        primary.append_event(&id, note(n), ExpectedVersion::Any).await.unwrap();
    }
    let good = primary.get_events(&id, 0).await.unwrap();
    replica.import_chain(&id, good.clone());
    primary.register_replica("eu-west", replica);

    let mut tampered = good.clone();
    tampered[2].event_data = json!({ "n": 999 });
    primary.import_chain(&id, tampered);

    assert_eq!(primary.detect_corruption().await.unwrap(), vec![id.clone()]);
    assert!(primary.repair_from_replica(&id, "eu-west").await.unwrap());

    assert!(primary.flagged_for_repair().is_empty());
    assert!(primary.verify_integrity(&id).await.unwrap());
    assert_eq!(primary.get_events(&id, 0).await.unwrap(), good);

    // Writes resume once the chain is restored
    let next = primary.append_event(&id, note(5), ExpectedVersion::Exact(5)).await.unwrap();
    assert_eq!(next, 6);
}

#[tokio::test]
async fn test_repair_escalates_when_replica_is_corrupt_too() {
    let primary = InMemoryEventStore::default();
    let replica = Arc::new(InMemoryEventStore::default());
    let id = IncidentId::from("inc-8");

    for n in 0..3 {
        primary.append_event(&id, note(n), ExpectedVersion::Any).await.unwrap();
    }
    let mut broken = primary.get_events(&id, 0).await.unwrap();
    broken.remove(1);
    replica.import_chain(&id, broken.clone());
    primary.import_chain(&id, broken);
    primary.register_replica("us-east", replica);

    primary.detect_corruption().await.unwrap();
    let err = primary.repair_from_replica(&id, "us-east").await.unwrap_err();

    assert!(err.is_integrity_failure());
    assert_eq!(primary.flagged_for_repair(), vec![id]);
}

#[tokio::test]
async fn test_load_state_matches_replay_after_snapshot() {
    let store = InMemoryEventStore::new(EventStoreConfig::new().with_snapshot_every(4));
    let id = IncidentId::from("inc-3");

    store
        .append_event(
            &id,
            NewEvent::new(event_types::INCIDENT_CREATED, json!({ "title": "api 5xx", "severity": "critical" })),
            ExpectedVersion::Exact(0),
        )
        .await
        .unwrap();
    store
        .append_event(
            &id,
            NewEvent::new(event_types::AGENT_ASSIGNED, json!({ "agent_type": "detection", "replica_id": "r-1" })),
            ExpectedVersion::Any,
        )
        .await
        .unwrap();
    for n in 0..5 {
        store.append_event(&id, note(n), ExpectedVersion::Any).await.unwrap();
    }

    let manual = store.replay_events(&id).await.unwrap();
    store.create_snapshot(&id, manual.clone()).await.unwrap();
    store
        .append_event(
            &id,
            NewEvent::new(event_types::INCIDENT_RESOLVED, json!({ "resolution": "rolled back" })),
            ExpectedVersion::Exact(7),
        )
        .await
        .unwrap();

    let loaded = store.load_state(&id).await.unwrap();
    assert_eq!(loaded, store.replay_events(&id).await.unwrap());
    assert_eq!(loaded.version, 8);
    assert_eq!(loaded.status, IncidentStatus::Resolved);
    assert_eq!(loaded.title.as_deref(), Some("api 5xx"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_stream_keeps_per_incident_order() {
    use futures::StreamExt;
    use std::collections::HashMap;

    let store = Arc::new(InMemoryEventStore::default());
    let incidents = [IncidentId::from("inc-x"), IncidentId::from("inc-y")];
    let per_writer = 8;
    let writers = 8;
    let mut feed = store.stream_events(chrono::DateTime::<chrono::Utc>::MIN_UTC);

    let mut handles = Vec::new();
    for w in 0..writers {
        let store = Arc::clone(&store);
        let id = incidents[w % incidents.len()].clone();
        handles.push(tokio::spawn(async move {
            for n in 0..per_writer {
                append_with_retry(store.as_ref(), &id, note(w * per_writer + n), 1_000)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut last: HashMap<IncidentId, u64> = HashMap::new();
    for _ in 0..writers * per_writer {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), feed.next())
            .await
            .unwrap()
            .unwrap();
        let prev = last.insert(event.incident_id.clone(), event.sequence_number).unwrap_or(0);
        assert_eq!(event.sequence_number, prev + 1, "{} arrived out of order", event.incident_id);
    }
    assert_eq!(last.values().sum::<u64>(), (writers * per_writer) as u64);
}
