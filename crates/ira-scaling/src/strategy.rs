//! Load balancing strategies
//!
//! Strategies see only routable replicas (not unhealthy, not isolated) and
//! return an index into that slice. Round-robin state lives in the pool,
//! so a strategy value is stateless and shared.

use crate::types::{AgentReplica, WorkItem};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A strategy's pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Index into the candidate slice
    pub index: usize,
    /// Routed outside the work item's preferred region
    pub failover: bool,
}

impl Selection {
    fn local(index: usize) -> Self {
        Self { index, failover: false }
    }
}

/// Replica selection policy
pub trait BalancingStrategy: Send + Sync + std::fmt::Debug {
    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Pick one of `candidates` (never empty)
    fn select(&self, candidates: &[AgentReplica], work: &WorkItem, cursor: &AtomicUsize) -> Selection;
}

/// Minimum `current_load`; ties go to the earliest replica
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastConnections;

impl BalancingStrategy for LeastConnections {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn select(&self, candidates: &[AgentReplica], _work: &WorkItem, _cursor: &AtomicUsize) -> Selection {
        Selection::local(least_loaded(candidates))
    }
}

/// Deterministic rotation, independent of load
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl BalancingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, candidates: &[AgentReplica], _work: &WorkItem, cursor: &AtomicUsize) -> Selection {
        Selection::local(cursor.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }
}

/// Same-region replica with the least load, else least-connections anywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct Geographic;

impl BalancingStrategy for Geographic {
    fn name(&self) -> &'static str {
        "geographic"
    }

    fn select(&self, candidates: &[AgentReplica], work: &WorkItem, _cursor: &AtomicUsize) -> Selection {
        let Some(region) = work.region.as_deref() else {
            return Selection::local(least_loaded(candidates));
        };
        candidates
            .iter()
            .enumerate()
            .filter(|(_, r)| r.region == region)
            .min_by_key(|(_, r)| r.current_load)
            .map_or_else(
                || Selection {
                    index: least_loaded(candidates),
                    failover: true,
                },
                |(i, _)| Selection::local(i),
            )
    }
}

/// High severity → best `performance_score`; otherwise least-connections
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityBased;

impl BalancingStrategy for SeverityBased {
    fn name(&self) -> &'static str {
        "severity_based"
    }

    fn select(&self, candidates: &[AgentReplica], work: &WorkItem, _cursor: &AtomicUsize) -> Selection {
        if !work.severity.is_high() {
            return Selection::local(least_loaded(candidates));
        }
        let best = candidates
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.performance_score
                    .total_cmp(&b.performance_score)
                    .then(b.current_load.cmp(&a.current_load))
                    .then(ib.cmp(ia))
            })
            .map_or(0, |(i, _)| i);
        Selection::local(best)
    }
}

fn least_loaded(candidates: &[AgentReplica]) -> usize {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, r)| r.current_load)
        .map_or(0, |(i, _)| i)
}

/// Built-in strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// [`LeastConnections`]
    #[default]
    LeastConnections,
    /// [`RoundRobin`]
    RoundRobin,
    /// [`Geographic`]
    Geographic,
    /// [`SeverityBased`]
    SeverityBased,
}

impl StrategyKind {
    /// Shared strategy instance
    #[must_use]
    pub fn strategy(self) -> &'static dyn BalancingStrategy {
        match self {
            Self::LeastConnections => &LeastConnections,
            Self::RoundRobin => &RoundRobin,
            Self::Geographic => &Geographic,
            Self::SeverityBased => &SeverityBased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentType, ReplicaId, ReplicaStatus, Severity};
    use chrono::Utc;

    fn replica(id: &str, region: &str, load: u32, score: f64) -> AgentReplica {
        AgentReplica {
            replica_id: ReplicaId::from(id),
            agent_type: AgentType::Diagnosis,
            region: region.to_string(),
            status: ReplicaStatus::Healthy,
            current_load: load,
            max_capacity: 5,
            performance_score: score,
            error_rate: 0.0,
            reachable: true,
            last_health_check: Utc::now(),
        }
    }

    fn fleet() -> Vec<AgentReplica> {
        vec![
            replica("a", "us-east-1", 3, 0.9),
            replica("b", "eu-west-1", 1, 0.5),
            replica("c", "eu-west-1", 2, 0.95),
        ]
    }

    #[test]
    fn least_connections_picks_minimum() {
        let pick = LeastConnections.select(&fleet(), &WorkItem::new("w"), &AtomicUsize::new(0));
        assert_eq!(pick, Selection::local(1));
    }

    #[test]
    fn round_robin_cycles() {
        let cursor = AtomicUsize::new(0);
        let work = WorkItem::new("w");
        let picks: Vec<usize> = (0..6).map(|_| RoundRobin.select(&fleet(), &work, &cursor).index).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn geographic_prefers_region_then_fails_over() {
        let cursor = AtomicUsize::new(0);
        let local = Geographic.select(&fleet(), &WorkItem::new("w").with_region("us-east-1"), &cursor);
        assert_eq!(local, Selection::local(0));

        let remote = Geographic.select(&fleet(), &WorkItem::new("w").with_region("ap-south-1"), &cursor);
        assert_eq!(remote, Selection { index: 1, failover: true });
    }

    #[test]
    fn severity_based_routes_high_to_best_performer() {
        let cursor = AtomicUsize::new(0);
        let high = SeverityBased.select(&fleet(), &WorkItem::new("w").with_severity(Severity::Critical), &cursor);
        assert_eq!(high.index, 2);
        let low = SeverityBased.select(&fleet(), &WorkItem::new("w").with_severity(Severity::Low), &cursor);
        assert_eq!(low.index, 1);
    }

    #[test]
    fn kinds_resolve_to_named_strategies() {
        assert_eq!(StrategyKind::Geographic.strategy().name(), "geographic");
        assert_eq!(StrategyKind::default().strategy().name(), "least_connections");
    }
}
