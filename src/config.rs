//! Dynamic parameters read at each decision point.
//!
//! These live outside the limbo and quota structs themselves (§4.13 of the
//! design) so that updating them is just a field write plus a broadcast,
//! never a restructuring of the core state.

use std::time::Duration;

use crate::clock::ReplicaId;

/// Parameters governing one limbo's quorum and timeout behavior.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Replica id whose transactions this limbo orders.
    pub owner_id: ReplicaId,
    /// Full replica set participating in quorum computation, including the
    /// owner itself.
    pub replicas: Vec<ReplicaId>,
    /// Number of replicas (including the owner) whose persisted LSN must
    /// reach a value before it is confirmed.
    pub quorum: usize,
    /// How long `wait_complete` parks before initiating a rollback.
    pub confirm_timeout: Duration,
}

impl ReplicationConfig {
    pub fn new(owner_id: ReplicaId, replicas: Vec<ReplicaId>, quorum: usize) -> Self {
        assert!(quorum >= 1, "quorum size must be positive");
        assert!(
            quorum <= replicas.len(),
            "quorum size cannot exceed the replica set"
        );
        assert!(
            replicas.contains(&owner_id),
            "replica set must include the owner"
        );
        Self {
            owner_id,
            replicas,
            quorum,
            confirm_timeout: Duration::from_secs(4),
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }
}

/// Parameters governing one quota's byte budget and diagnostics.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Configured byte budget.
    pub limit: u64,
    /// Wait durations longer than this are logged as a diagnostic.
    pub too_long_threshold: Duration,
}

impl QuotaConfig {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            too_long_threshold: Duration::from_secs(1),
        }
    }

    pub fn with_too_long_threshold(mut self, threshold: Duration) -> Self {
        self.too_long_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_config_defaults_confirm_timeout() {
        let cfg = ReplicationConfig::new(1, vec![1, 2, 3], 2);
        assert_eq!(cfg.confirm_timeout, Duration::from_secs(4));
    }

    #[test]
    #[should_panic(expected = "quorum size must be positive")]
    fn replication_config_rejects_zero_quorum() {
        ReplicationConfig::new(1, vec![1], 0);
    }

    #[test]
    #[should_panic(expected = "replica set must include the owner")]
    fn replication_config_requires_owner_in_replica_set() {
        ReplicationConfig::new(9, vec![1, 2], 1);
    }
}
