//! Breaker registry and dashboard

use crate::breaker::{BreakerSnapshot, CircuitBreaker, FaultSpec};
use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::state::BreakerState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Minimum health score for a closed breaker to count as healthy
pub const HEALTHY_SCORE: f64 = 0.7;

/// Qualitative system status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    /// At least 90% of dependencies healthy
    Excellent,
    /// At least 50% healthy
    Degraded,
    /// Fewer than half healthy
    Critical,
}

impl SystemStatus {
    /// Classify an overall health percentage
    #[must_use]
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= 90.0 {
            Self::Excellent
        } else if pct >= 50.0 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

/// Registry-wide snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerDashboard {
    /// Per-dependency snapshots, sorted by name
    pub dependencies: Vec<BreakerSnapshot>,
    /// Closed breakers with health at or above [`HEALTHY_SCORE`]
    pub healthy_count: usize,
    /// Registered breakers
    pub total_count: usize,
    /// `healthy_count / total_count` as a percentage (100 when empty)
    pub overall_health_pct: f64,
    /// Qualitative label
    pub status: SystemStatus,
}

/// One breaker per named dependency
#[derive(Debug)]
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Create registry; unregistered dependencies get `defaults`
    #[must_use]
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            breakers: DashMap::new(),
        }
    }

    /// Default configuration
    #[inline]
    #[must_use]
    pub fn defaults(&self) -> &BreakerConfig {
        &self.defaults
    }

    /// Register a dependency with its own configuration, replacing any existing breaker
    pub fn register(&self, dependency: impl Into<String>, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let dependency = dependency.into();
        let breaker = Arc::new(CircuitBreaker::new(dependency.clone(), config));
        self.breakers.insert(dependency, Arc::clone(&breaker));
        breaker
    }

    /// Breaker for `dependency`, created with defaults on first use
    #[must_use]
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(dependency.to_string()).or_insert_with(|| {
            debug!(dependency, "breaker created");
            Arc::new(CircuitBreaker::new(dependency, self.defaults.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Breaker for `dependency`, if registered
    #[must_use]
    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| Arc::clone(b.value()))
    }

    /// Registered dependency names, sorted
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run `op` through the breaker for `dependency`
    ///
    /// # Errors
    /// See [`CircuitBreaker::call`].
    pub async fn call<F, Fut, T, E>(&self, dependency: &str, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker(dependency);
        breaker.call(op).await
    }

    /// Current state of `dependency` (closed if never seen)
    #[must_use]
    pub fn state(&self, dependency: &str) -> BreakerState {
        self.get(dependency).map_or(BreakerState::Closed, |b| b.state())
    }

    /// Apply due cooldowns; returns breakers that moved to half-open
    pub fn tick(&self) -> Vec<String> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut probing = Vec::new();
        for breaker in breakers {
            if breaker.tick() {
                probing.push(breaker.name().to_string());
            }
        }
        probing
    }

    /// Inject a fault into `dependency`
    pub fn inject_fault(&self, dependency: &str, spec: FaultSpec) {
        self.breaker(dependency).inject_fault(spec);
    }

    /// Clear an injected fault; returns whether one was active
    pub fn clear_fault(&self, dependency: &str) -> bool {
        self.get(dependency).is_some_and(|b| b.clear_fault())
    }

    /// Operator override back to `closed`; false if unknown
    pub fn reset(&self, dependency: &str) -> bool {
        match self.get(dependency) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    /// Snapshot every breaker plus the system-wide aggregate
    #[must_use]
    pub fn dashboard(&self) -> BreakerDashboard {
        let mut dependencies: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|e| e.value().snapshot()).collect();
        dependencies.sort_by(|a, b| a.dependency.cmp(&b.dependency));

        let total_count = dependencies.len();
        let healthy_count = dependencies
            .iter()
            .filter(|s| s.state == BreakerState::Closed && s.health_score >= HEALTHY_SCORE)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let overall_health_pct = if total_count == 0 {
            100.0
        } else {
            healthy_count as f64 / total_count as f64 * 100.0
        };

        metrics::gauge!("ira_breaker_overall_health_pct").set(overall_health_pct);
        BreakerDashboard {
            dependencies,
            healthy_count,
            total_count,
            overall_health_pct,
            status: SystemStatus::from_percentage(overall_health_pct),
        }
    }

    /// Tick every `tick_interval` until `shutdown` flips to true
    pub fn spawn_ticker(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.defaults.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let probing = registry.tick();
                        if !probing.is_empty() {
                            debug!(?probing, "breakers entered half-open");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("breaker ticker stopped");
        })
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
