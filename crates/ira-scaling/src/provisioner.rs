//! Provisioning backend seam

use crate::error::ProvisionError;
use crate::types::{AgentType, ReplicaId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Request to create compute capacity for one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Replica to create
    pub replica_id: ReplicaId,
    /// Agent type
    pub agent_type: AgentType,
    /// Target region
    pub region: String,
    /// Capacity the replica will advertise
    pub max_capacity: u32,
}

/// Region/provisioning backend
#[async_trait]
pub trait Provisioner: Send + Sync + std::fmt::Debug {
    /// Create capacity; the replica joins the pool only after this succeeds
    async fn provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError>;

    /// Remove capacity for a replica already taken out of the pool
    async fn decommission(&self, replica_id: &ReplicaId) -> Result<(), ProvisionError>;
}

/// Provision with bounded, timed attempts and linear backoff
///
/// # Errors
/// `Exhausted` carrying the last attempt's failure.
pub async fn provision_with_retry(
    provisioner: &dyn Provisioner,
    request: &ProvisionRequest,
    attempts: u32,
    timeout: Duration,
    backoff: Duration,
) -> Result<(), ProvisionError> {
    let attempts = attempts.max(1);
    let mut last = ProvisionError::Timeout { after_ms: 0 };
    for attempt in 1..=attempts {
        let outcome = tokio::time::timeout(timeout, provisioner.provision(request))
            .await
            .unwrap_or_else(|_| {
                Err(ProvisionError::Timeout {
                    after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });
        match outcome {
            Ok(()) => {
                debug!(replica = %request.replica_id, attempt, "replica provisioned");
                return Ok(());
            }
            Err(e) => {
                warn!(replica = %request.replica_id, attempt, error = %e, "provisioning attempt failed");
                last = e;
                if attempt < attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }
    Err(ProvisionError::Exhausted {
        replica_id: request.replica_id.clone(),
        attempts,
        last: Box::new(last),
    })
}

/// In-process provisioner that always has capacity
///
/// Failures and latency can be scripted for tests.
#[derive(Debug, Default)]
pub struct InMemoryProvisioner {
    provisioned: DashMap<ReplicaId, ProvisionRequest>,
    fail_next: AtomicU32,
    latency: Duration,
}

impl InMemoryProvisioner {
    /// Create provisioner
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` provision calls
    #[must_use]
    pub fn failing(self, n: u32) -> Self {
        self.fail_next.store(n, Ordering::Relaxed);
        self
    }

    /// Delay every call
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject the next `n` provision calls from now on
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    /// Replicas currently provisioned
    #[must_use]
    pub fn provisioned_count(&self) -> usize {
        self.provisioned.len()
    }

    /// Whether `replica_id` is provisioned
    #[must_use]
    pub fn is_provisioned(&self, replica_id: &ReplicaId) -> bool {
        self.provisioned.contains_key(replica_id)
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProvisionError::Rejected {
                region: request.region.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        self.provisioned.insert(request.replica_id.clone(), request.clone());
        Ok(())
    }

    async fn decommission(&self, replica_id: &ReplicaId) -> Result<(), ProvisionError> {
        self.provisioned.remove(replica_id);
        Ok(())
    }
}
