//! Replay determinism properties

use ira_events::checksum::verify_chain;
use ira_events::prelude::*;
use proptest::prelude::*;
use serde_json::json;

fn arb_event() -> impl Strategy<Value = NewEvent> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|t| NewEvent::new(event_types::INCIDENT_CREATED, json!({ "title": t, "severity": "low" }))),
        (0..5u8).prop_map(|r| NewEvent::new(
            event_types::AGENT_ASSIGNED,
            json!({ "agent_type": "diagnosis", "replica_id": format!("r-{r}") })
        )),
        Just(NewEvent::new(event_types::AGENT_COMPLETED, json!({ "agent_type": "diagnosis" }))),
        prop_oneof![Just("open"), Just("mitigating"), Just("bogus")]
            .prop_map(|s| NewEvent::new(event_types::STATUS_CHANGED, json!({ "status": s }))),
        (any::<u16>()).prop_map(|n| NewEvent::new("custom", json!({ "k": n }))),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_replay_is_deterministic_and_chain_verifies(
        events in proptest::collection::vec(arb_event(), 0..40),
        snapshot_every in 0..6u64,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = InMemoryEventStore::new(EventStoreConfig::new().with_snapshot_every(snapshot_every));
            let id = IncidentId::from("inc-prop");
            for event in &events {
                store.append_event(&id, event.clone(), ExpectedVersion::Any).await.unwrap();
            }

            let a = store.replay_events(&id).await.unwrap();
            let b = store.replay_events(&id).await.unwrap();
            let loaded = store.load_state(&id).await.unwrap();
            let chain = store.get_events(&id, 0).await.unwrap();

            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &loaded);
            prop_assert_eq!(a.version, events.len() as u64);
            prop_assert_eq!(a.event_count, a.version);
            prop_assert!(verify_chain(&id, &chain).is_ok());
            prop_assert!(chain.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            Ok(())
        })?;
    }
}
