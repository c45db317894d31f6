//! Breaker state machine tests
//!
//! A reference model is driven alongside the real breaker on a paused clock.

use ira_breaker::prelude::*;
use ira_breaker::state::{allowed_transitions, can_transition};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const THRESHOLD: u32 = 3;
const COOLDOWN_SECS: u64 = 30;

fn config() -> BreakerConfig {
    BreakerConfig::new()
        .with_failure_threshold(THRESHOLD)
        .with_cooldown_secs(COOLDOWN_SECS)
        .with_failure_window_secs(1_000_000)
        .with_call_timeout_ms(1_000)
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Fail,
    Succeed,
    Advance(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Fail),
        2 => Just(Op::Succeed),
        2 => (1..45u64).prop_map(Op::Advance),
    ]
}

#[derive(Debug)]
struct Model {
    state: BreakerState,
    failures: u32,
    now: u64,
    opened_at: u64,
}

impl Model {
    fn advance(&mut self) {
        if self.state == BreakerState::Open && self.now - self.opened_at >= COOLDOWN_SECS {
            self.state = BreakerState::HalfOpen;
        }
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = self.now;
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Advance(secs) => self.now += secs,
            Op::Fail => {
                self.advance();
                match self.state {
                    BreakerState::Closed => {
                        self.failures += 1;
                        if self.failures >= THRESHOLD {
                            self.open();
                        }
                    }
                    BreakerState::HalfOpen => self.open(),
                    BreakerState::Open => {}
                }
            }
            Op::Succeed => {
                self.advance();
                match self.state {
                    BreakerState::Closed => self.failures = self.failures.saturating_sub(1),
                    BreakerState::HalfOpen => {
                        self.state = BreakerState::Closed;
                        self.failures = 0;
                    }
                    BreakerState::Open => {}
                }
            }
        }
        self.advance();
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_breaker_follows_reference_model(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let rt = paused_runtime();
        rt.block_on(async {
            let breaker = CircuitBreaker::new("dep", config());
            let mut model = Model { state: BreakerState::Closed, failures: 0, now: 0, opened_at: 0 };

            for op in ops {
                let before = breaker.state();
                match op {
                    Op::Advance(secs) => tokio::time::advance(Duration::from_secs(secs)).await,
                    Op::Fail => {
                        let _ = breaker.call(|| async { Err::<(), _>("fail") }).await;
                    }
                    Op::Succeed => {
                        let _ = breaker.call(|| async { Ok::<_, ()>(()) }).await;
                    }
                }
                model.apply(op);

                let after = breaker.state();
                prop_assert_eq!(after, model.state, "after {:?}", op);
                if before != after {
                    // Either a direct edge or cooldown followed by a probe outcome
                    prop_assert!(
                        can_transition(before, after)
                            || (before == BreakerState::Open && can_transition(BreakerState::HalfOpen, after))
                    );
                }
                if after == BreakerState::Closed {
                    prop_assert_eq!(breaker.snapshot().failure_count, model.failures);
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_transitions_are_subset_of_allowed(
        from in prop_oneof![Just(BreakerState::Closed), Just(BreakerState::Open), Just(BreakerState::HalfOpen)],
        to in prop_oneof![Just(BreakerState::Closed), Just(BreakerState::Open), Just(BreakerState::HalfOpen)],
    ) {
        prop_assert_eq!(can_transition(from, to), allowed_transitions(from).contains(&to));
        prop_assert!(!can_transition(from, from));
    }
}

#[tokio::test(start_paused = true)]
async fn test_exact_threshold_then_cooldown_then_probe() {
    let breaker = CircuitBreaker::new("detection", config());
    for _ in 0..THRESHOLD {
        assert_eq!(breaker.state(), BreakerState::Closed);
        let _ = breaker.call(|| async { Err::<(), _>("x") }).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(COOLDOWN_SECS)).await;
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    breaker.call(|| async { Ok::<_, ()>(()) }).await.unwrap();
    let snap = breaker.snapshot();
    assert_eq!(snap.state, BreakerState::Closed);
    assert_eq!(snap.failure_count, 0);
    assert_eq!(snap.counters.opens, 1);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_single_probe() {
    let breaker = Arc::new(CircuitBreaker::new(
        "api",
        BreakerConfig::new().with_failure_threshold(1).with_cooldown_secs(10).with_call_timeout_ms(5_000),
    ));
    let _ = breaker.call(|| async { Err::<(), _>(()) }).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    let (release, held) = oneshot::channel::<()>();
    let probe = {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move { breaker.call(|| async move { held.await.map_err(|_| ()) }).await })
    };
    tokio::task::yield_now().await;

    let second: Result<(), BreakerError<()>> = breaker.call(|| async { Ok(()) }).await;
    match second {
        Err(BreakerError::Open { retry_after, .. }) => assert_eq!(retry_after, Duration::ZERO),
        other => panic!("expected fail-fast, got {other:?}"),
    }

    release.send(()).unwrap();
    assert!(probe.await.unwrap().is_ok());
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_probe_is_bounded_by_call_timeout() {
    let breaker = CircuitBreaker::new(
        "llm",
        BreakerConfig::new().with_failure_threshold(1).with_cooldown_secs(10).with_call_timeout_ms(2_000),
    );
    let _ = breaker.call(|| async { Err::<(), _>(()) }).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    let result: Result<(), BreakerError<()>> = breaker
        .call(|| async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(BreakerError::Timeout { .. })));
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_probe_frees_the_slot() {
    let breaker = Arc::new(CircuitBreaker::new(
        "api",
        BreakerConfig::new().with_failure_threshold(1).with_cooldown_secs(10),
    ));
    let _ = breaker.call(|| async { Err::<(), _>(()) }).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    let probe = {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move {
            breaker
                .call(|| async {
                    std::future::pending::<()>().await;
                    Ok::<_, ()>(())
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    probe.abort();
    assert!(probe.await.unwrap_err().is_cancelled());

    breaker.call(|| async { Ok::<_, ()>(()) }).await.unwrap();
    assert_eq!(breaker.state(), BreakerState::Closed);
}
