//! A single circuit breaker
//!
//! All transitions for one dependency happen under its own mutex, so two
//! callers can never observe or cause conflicting transitions. The lock is
//! never held across the wrapped call.

use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::state::{can_transition, BreakerState};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const HEALTH_RECOVERY_STEP: f64 = 0.1;
const HEALTH_FAILURE_PENALTY: f64 = 0.2;

/// How an injected fault manifests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    /// Call fails immediately
    Error,
    /// Call hangs until the call timeout
    Hang,
}

/// Fault applied to a fraction of calls through a breaker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultSpec {
    /// Manifestation
    pub mode: FaultMode,
    /// Fraction of calls affected (0.0–1.0)
    pub probability: f64,
}

impl FaultSpec {
    /// Fail calls with the given probability
    #[must_use]
    pub fn error(probability: f64) -> Self {
        Self {
            mode: FaultMode::Error,
            probability: probability.clamp(0.0, 1.0),
        }
    }

    /// Hang calls with the given probability
    #[must_use]
    pub fn hang(probability: f64) -> Self {
        Self {
            mode: FaultMode::Hang,
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerCounters {
    /// Calls admitted
    pub calls: u64,
    /// Successful calls
    pub successes: u64,
    /// Failed calls (timeouts and injected faults included)
    pub failures: u64,
    /// Timed-out calls
    pub timeouts: u64,
    /// Calls rejected without invoking the dependency
    pub rejections: u64,
    /// Transitions into `open`
    pub opens: u64,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Protected dependency
    pub dependency: String,
    /// Current state
    pub state: BreakerState,
    /// Failures inside the rolling window
    pub failure_count: u32,
    /// Derived health (0.0–1.0)
    pub health_score: f64,
    /// Wall-clock time of the last transition
    pub last_state_transition: DateTime<Utc>,
    /// Wall-clock time the breaker last opened
    pub last_opened_at: Option<DateTime<Utc>>,
    /// Lifetime counters
    pub counters: BreakerCounters,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    health_score: f64,
    last_transition: Instant,
    last_transition_at: DateTime<Utc>,
    last_opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    counters: BreakerCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker for one dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    fault: RwLock<Option<FaultSpec>>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                health_score: 1.0,
                last_transition: Instant::now(),
                last_transition_at: Utc::now(),
                last_opened_at: None,
                trial_in_flight: false,
                counters: BreakerCounters::default(),
            }),
            fault: RwLock::new(None),
        }
    }

    /// Dependency name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, applying any due cooldown first
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    /// Move `open` to `half_open` if the cooldown has elapsed; true if it moved
    pub fn tick(&self) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.state;
        self.advance(&mut inner, Instant::now());
        before != inner.state
    }

    /// Snapshot for dashboards
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.advance(&mut inner, now);
        self.prune(&mut inner, now);
        BreakerSnapshot {
            dependency: self.name.clone(),
            state: inner.state,
            failure_count: u32::try_from(inner.failures.len()).unwrap_or(u32::MAX),
            health_score: inner.health_score,
            last_state_transition: inner.last_transition_at,
            last_opened_at: inner.last_opened_at,
            counters: inner.counters,
        }
    }

    /// Make a fraction of future calls fail or hang
    pub fn inject_fault(&self, spec: FaultSpec) {
        warn!(dependency = %self.name, ?spec, "fault injected");
        *self.fault.write() = Some(spec);
    }

    /// Remove an injected fault; returns whether one was active
    pub fn clear_fault(&self) -> bool {
        let cleared = self.fault.write().take().is_some();
        if cleared {
            info!(dependency = %self.name, "fault cleared");
        }
        cleared
    }

    /// Currently injected fault
    #[must_use]
    pub fn fault(&self) -> Option<FaultSpec> {
        *self.fault.read()
    }

    /// Operator override: force `closed` and clear counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.health_score = 1.0;
        inner.trial_in_flight = false;
        inner.last_transition = Instant::now();
        inner.last_transition_at = Utc::now();
        info!(dependency = %self.name, %from, "breaker reset by operator");
    }

    /// Run `op` through the breaker
    ///
    /// # Errors
    /// - `Open` without invoking `op` while the breaker is open, or while
    ///   another half-open probe is in flight
    /// - `Timeout` if `op` exceeds the call timeout
    /// - `Injected` if an injected fault fired
    /// - `Failed` with the operation's own error
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().map_err(|retry_after| BreakerError::Open {
            dependency: self.name.clone(),
            retry_after,
        })?;
        let mut permit = Permit {
            breaker: self,
            admission,
            settled: false,
        };

        let after = self.config.call_timeout();
        let result = match self.sample_fault() {
            Some(FaultMode::Hang) => {
                tokio::time::sleep(after).await;
                Err(BreakerError::Timeout {
                    dependency: self.name.clone(),
                    after,
                })
            }
            Some(FaultMode::Error) => Err(BreakerError::Injected {
                dependency: self.name.clone(),
            }),
            None => match tokio::time::timeout(after, op()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(BreakerError::Failed(e)),
                Err(_) => Err(BreakerError::Timeout {
                    dependency: self.name.clone(),
                    after,
                }),
            },
        };

        match &result {
            Ok(_) => permit.settle(true, false),
            Err(e) => permit.settle(false, matches!(e, BreakerError::Timeout { .. })),
        }
        result
    }

    fn sample_fault(&self) -> Option<FaultMode> {
        let spec = (*self.fault.read())?;
        (rand::random::<f64>() < spec.probability).then_some(spec.mode)
    }

    fn admit(&self) -> Result<Admission, Duration> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.advance(&mut inner, now);
        match inner.state {
            BreakerState::Closed => {
                inner.counters.calls += 1;
                Ok(Admission::Normal)
            }
            BreakerState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                inner.counters.calls += 1;
                debug!(dependency = %self.name, "half-open probe admitted");
                Ok(Admission::Trial)
            }
            BreakerState::HalfOpen => {
                inner.counters.rejections += 1;
                metrics::counter!("ira_breaker_rejections_total", "dependency" => self.name.clone()).increment(1);
                Err(Duration::ZERO)
            }
            BreakerState::Open => {
                inner.counters.rejections += 1;
                metrics::counter!("ira_breaker_rejections_total", "dependency" => self.name.clone()).increment(1);
                let elapsed = now.saturating_duration_since(inner.last_transition);
                Err(self.config.cooldown().saturating_sub(elapsed))
            }
        }
    }

    fn record(&self, admission: Admission, success: bool, timed_out: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if success {
            inner.counters.successes += 1;
            inner.health_score = (inner.health_score + HEALTH_RECOVERY_STEP).min(1.0);
        } else {
            inner.counters.failures += 1;
            if timed_out {
                inner.counters.timeouts += 1;
            }
            inner.health_score = (inner.health_score - HEALTH_FAILURE_PENALTY).max(0.0);
        }

        match (admission, success) {
            (Admission::Trial, true) => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Closed, now);
            }
            (Admission::Trial, false) => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Open, now);
            }
            // Normal calls only move the counter while still closed
            (Admission::Normal, true) => {
                if inner.state == BreakerState::Closed {
                    inner.failures.pop_front();
                }
            }
            (Admission::Normal, false) => {
                if inner.state == BreakerState::Closed {
                    inner.failures.push_back(now);
                    self.prune(&mut inner, now);
                    if inner.failures.len() >= self.config.failure_threshold as usize {
                        self.transition(&mut inner, BreakerState::Open, now);
                    }
                }
            }
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        debug!(dependency = %self.name, "half-open probe abandoned");
    }

    fn advance(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open
            && now.saturating_duration_since(inner.last_transition) >= self.config.cooldown()
        {
            self.transition(inner, BreakerState::HalfOpen, now);
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        let window = self.config.failure_window();
        while let Some(&oldest) = inner.failures.front() {
            if now.saturating_duration_since(oldest) > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        if !can_transition(from, to) {
            return;
        }
        inner.state = to;
        inner.last_transition = now;
        inner.last_transition_at = Utc::now();
        match to {
            BreakerState::Open => {
                inner.counters.opens += 1;
                inner.last_opened_at = Some(inner.last_transition_at);
                warn!(dependency = %self.name, %from, failures = inner.failures.len(), "circuit opened");
            }
            BreakerState::HalfOpen => {
                info!(dependency = %self.name, "circuit half-open, awaiting probe");
            }
            BreakerState::Closed => {
                inner.failures.clear();
                info!(dependency = %self.name, "circuit closed");
            }
        }
        metrics::counter!(
            "ira_breaker_transitions_total",
            "dependency" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

/// Settles an admitted call exactly once; a dropped probe frees the slot
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, success: bool, timed_out: bool) {
        self.settled = true;
        self.breaker.record(self.admission, success, timed_out);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.abandon_trial();
        }
    }
}
