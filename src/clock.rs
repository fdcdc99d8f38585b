//! Per-replica LSN tracking.
//!
//! `ClockVector` is the limbo's view of "how far has each replica
//! persisted the owner's log". Component `owner_id` is the owner's own
//! locally-confirmed LSN; every other component is the owner's LSN as last
//! reported by that replica's ACK.

use std::collections::HashMap;

/// Replica identifier. Small positive integer in the originating design;
/// kept as `u32` here since it is never arithmetically combined with an
/// LSN.
pub type ReplicaId = u32;

/// Log sequence number. `-1` (via `Option::None` at the entry level, see
/// `limbo::LimboEntry`) means "not yet assigned"; within the clock vector
/// itself every stored component is a real, non-negative LSN.
pub type Lsn = i64;

/// A sparse per-replica LSN map with monotonic updates.
#[derive(Debug, Default, Clone)]
pub struct ClockVector {
    components: HashMap<ReplicaId, Lsn>,
}

impl ClockVector {
    pub fn new() -> Self {
        Self {
            components: HashMap::new(),
        }
    }

    /// Components not present count as 0.
    pub fn get(&self, replica_id: ReplicaId) -> Lsn {
        self.components.get(&replica_id).copied().unwrap_or(0)
    }

    /// Unconditionally set a component. The original design requires
    /// callers to never regress an LSN; that monotonicity is enforced by
    /// the caller (`Limbo`) via [`ClockVector::advance`], not here, so this
    /// remains usable for tests that want to seed arbitrary state.
    pub fn set(&mut self, replica_id: ReplicaId, lsn: Lsn) {
        self.components.insert(replica_id, lsn);
    }

    /// Advance a component to `max(current, lsn)`. This is the form every
    /// production call site uses: ACKs and local WAL completions only ever
    /// move a replica's watermark forward, and out-of-order or duplicate
    /// deliveries must not regress it.
    ///
    /// Returns `true` if the component actually advanced.
    pub fn advance(&mut self, replica_id: ReplicaId, lsn: Lsn) -> bool {
        let current = self.get(replica_id);
        if lsn > current {
            self.components.insert(replica_id, lsn);
            true
        } else {
            false
        }
    }

    /// Advance a component to `lsn`, panicking if that would regress it.
    /// The owner's own local WAL completions are a trusted source — unlike
    /// [`ClockVector::advance`]'s silent clamping for untrusted transport
    /// ACKs, a local LSN going backwards is a programming error upstream.
    pub fn set_monotonic(&mut self, replica_id: ReplicaId, lsn: Lsn) {
        let current = self.get(replica_id);
        assert!(
            lsn >= current,
            "local lsn regressed for replica {replica_id}: {lsn} < {current}"
        );
        self.components.insert(replica_id, lsn);
    }

    /// Number of tracked replicas whose component is `>= x`. Replicas never
    /// observed default to 0 and are only counted if `x <= 0`.
    pub fn count_ge(&self, x: Lsn, replicas: &[ReplicaId]) -> usize {
        replicas.iter().filter(|r| self.get(**r) >= x).count()
    }

    /// The k-th largest component among `replicas` (1-indexed: k=1 is the
    /// maximum). Missing replicas contribute an implicit 0. Used directly
    /// by quorum evaluation: `kth_largest(quorum)` is the highest LSN for
    /// which at least `quorum` replicas have caught up.
    ///
    /// Panics if `k` is 0 or exceeds `replicas.len()` — both are
    /// configuration errors upstream (quorum size must be a positive
    /// integer no larger than the replica set).
    pub fn kth_largest(&self, k: usize, replicas: &[ReplicaId]) -> Lsn {
        assert!(k >= 1 && k <= replicas.len(), "quorum size out of range");
        let mut values: Vec<Lsn> = replicas.iter().map(|r| self.get(*r)).collect();
        values.sort_unstable_by(|a, b| b.cmp(a));
        values[k - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_component_is_zero() {
        let v = ClockVector::new();
        assert_eq!(v.get(1), 0);
    }

    #[test]
    fn advance_is_monotonic() {
        let mut v = ClockVector::new();
        assert!(v.advance(2, 10));
        assert_eq!(v.get(2), 10);
        assert!(!v.advance(2, 5));
        assert_eq!(v.get(2), 10);
        assert!(v.advance(2, 11));
        assert_eq!(v.get(2), 11);
    }

    #[test]
    fn kth_largest_picks_quorum_threshold() {
        let mut v = ClockVector::new();
        v.set(1, 10);
        v.set(2, 10);
        v.set(3, 5);
        let replicas = [1, 2, 3];
        assert_eq!(v.kth_largest(1, &replicas), 10);
        assert_eq!(v.kth_largest(2, &replicas), 10);
        assert_eq!(v.kth_largest(3, &replicas), 5);
    }

    #[test]
    fn set_monotonic_accepts_equal_or_advancing() {
        let mut v = ClockVector::new();
        v.set_monotonic(1, 5);
        v.set_monotonic(1, 5);
        v.set_monotonic(1, 9);
        assert_eq!(v.get(1), 9);
    }

    #[test]
    #[should_panic(expected = "local lsn regressed")]
    fn set_monotonic_rejects_regression() {
        let mut v = ClockVector::new();
        v.set_monotonic(1, 9);
        v.set_monotonic(1, 3);
    }

    #[test]
    fn count_ge_counts_missing_as_zero() {
        let mut v = ClockVector::new();
        v.set(1, 7);
        let replicas = [1, 2];
        assert_eq!(v.count_ge(7, &replicas), 1);
        assert_eq!(v.count_ge(0, &replicas), 2);
    }
}
