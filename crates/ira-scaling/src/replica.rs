//! Live replica state
//!
//! `current_load` is an atomic so the routing path reads it without locks.
//! Writes to it happen only while the replica's work table is locked,
//! which makes assign/release atomic with respect to each other.

use crate::error::ScalingError;
use crate::types::{AgentReplica, AgentType, ReplicaId, ReplicaStatus, WorkId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy)]
struct Health {
    status: ReplicaStatus,
    performance_score: f64,
    error_rate: f64,
    last_health_check: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct Replica {
    pub(crate) id: ReplicaId,
    pub(crate) agent_type: AgentType,
    pub(crate) region: String,
    pub(crate) max_capacity: u32,
    load: AtomicU32,
    reachable: AtomicBool,
    draining: AtomicBool,
    assignments_total: AtomicU64,
    health: RwLock<Health>,
    work: Mutex<HashMap<WorkId, DateTime<Utc>>>,
}

impl Replica {
    pub(crate) fn new(id: ReplicaId, agent_type: AgentType, region: String) -> Self {
        Self {
            id,
            agent_type,
            region,
            max_capacity: agent_type.max_capacity(),
            load: AtomicU32::new(0),
            reachable: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            assignments_total: AtomicU64::new(0),
            health: RwLock::new(Health {
                status: ReplicaStatus::Healthy,
                performance_score: 1.0,
                error_rate: 0.0,
                last_health_check: Utc::now(),
            }),
            work: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn load(&self) -> u32 {
        self.load.load(Ordering::Acquire)
    }

    pub(crate) fn assignments_total(&self) -> u64 {
        self.assignments_total.load(Ordering::Relaxed)
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Not unhealthy, reachable and not draining
    pub(crate) fn is_routable(&self) -> bool {
        self.is_reachable()
            && !self.draining.load(Ordering::Acquire)
            && self.health.read().status != ReplicaStatus::Unhealthy
    }

    pub(crate) fn status(&self) -> ReplicaStatus {
        self.health.read().status
    }

    pub(crate) fn set_health(&self, status: ReplicaStatus, performance_score: Option<f64>, error_rate: Option<f64>) {
        let mut health = self.health.write();
        health.status = status;
        if let Some(score) = performance_score {
            health.performance_score = score.clamp(0.0, 1.0);
        }
        if let Some(rate) = error_rate {
            health.error_rate = rate.clamp(0.0, 1.0);
        }
        health.last_health_check = Utc::now();
    }

    pub(crate) fn try_assign(&self, work_id: &WorkId) -> Result<u32, ScalingError> {
        if !self.is_reachable() {
            return Err(ScalingError::ReplicaUnreachable(self.id.clone()));
        }
        let mut work = self.work.lock();
        // draining is only set under this lock
        if self.draining.load(Ordering::Acquire) {
            return Err(ScalingError::ReplicaDraining(self.id.clone()));
        }
        if work.contains_key(work_id) {
            return Err(ScalingError::DuplicateAssignment {
                replica_id: self.id.clone(),
                work_id: work_id.clone(),
            });
        }
        let current = self.load.load(Ordering::Acquire);
        if current >= self.max_capacity {
            return Err(ScalingError::AtCapacity {
                replica_id: self.id.clone(),
                max_capacity: self.max_capacity,
            });
        }
        work.insert(work_id.clone(), Utc::now());
        self.load.store(current + 1, Ordering::Release);
        self.assignments_total.fetch_add(1, Ordering::Relaxed);
        Ok(current + 1)
    }

    pub(crate) fn release(&self, work_id: &WorkId) -> Result<u32, ScalingError> {
        let mut work = self.work.lock();
        if work.remove(work_id).is_none() {
            return Err(ScalingError::UnknownWork {
                replica_id: self.id.clone(),
                work_id: work_id.clone(),
            });
        }
        let current = self.load.load(Ordering::Acquire);
        let next = current.saturating_sub(1);
        self.load.store(next, Ordering::Release);
        Ok(next)
    }

    /// Work held, oldest first
    pub(crate) fn active_work(&self) -> Vec<(WorkId, DateTime<Utc>)> {
        let mut held: Vec<(WorkId, DateTime<Utc>)> =
            self.work.lock().iter().map(|(w, at)| (w.clone(), *at)).collect();
        held.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        held
    }

    /// Mark for removal if idle; false if it holds work
    pub(crate) fn try_drain(&self) -> bool {
        let work = self.work.lock();
        if !work.is_empty() {
            return false;
        }
        self.draining.store(true, Ordering::Release);
        true
    }

    pub(crate) fn snapshot(&self) -> AgentReplica {
        let health = *self.health.read();
        AgentReplica {
            replica_id: self.id.clone(),
            agent_type: self.agent_type,
            region: self.region.clone(),
            status: health.status,
            current_load: self.load(),
            max_capacity: self.max_capacity,
            performance_score: health.performance_score,
            error_rate: health.error_rate,
            reachable: self.is_reachable(),
            last_health_check: health.last_health_check,
        }
    }
}
