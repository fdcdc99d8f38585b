//! The synchronous-replication limbo: orders one owner instance's pending
//! transactions, fans in replica ACKs against a quorum, and decides
//! confirm vs. rollback, including cascading rollback of a pending suffix.
//!
//! The original design assumes a single-threaded cooperative-fiber host
//! (§5 of the design notes). This crate targets the preemptive-threads
//! refinement the same notes call out explicitly: one [`std::sync::Mutex`]
//! guards all limbo state and every park is a
//! [`std::sync::Condvar::wait_timeout`] with a deadline, recomputed from the
//! live [`ReplicationConfig`] on every wake so `on_parameters_change` takes
//! effect immediately for anyone currently parked.

mod entry;

pub use entry::{EntryId, EntrySnapshot, Origin, Status};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::clock::{ClockVector, Lsn, ReplicaId};
use crate::config::ReplicationConfig;
use crate::error::{LimboError, LimboResult};
use crate::wal::WalSink;
use entry::LimboEntry;

struct State<T> {
    queue: VecDeque<LimboEntry<T>>,
    /// Terminal snapshots of entries no longer in `queue`, retained until
    /// the caller calls [`Limbo::release`] — the Rust stand-in for
    /// "destroyed by the transaction owner after observing terminal
    /// status" (§3). Keeps the full snapshot, not just `Status`: §3 says
    /// "once terminal, `lsn` is frozen", so a committed/rolled-back
    /// entry's LSN and ack count remain observable, not reset.
    terminal: HashMap<EntryId, EntrySnapshot>,
    owner_id: Option<ReplicaId>,
    clock: ClockVector,
    rollback_count: u64,
    in_rollback: bool,
    next_id: EntryId,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            terminal: HashMap::new(),
            owner_id: None,
            clock: ClockVector::new(),
            rollback_count: 0,
            in_rollback: false,
            next_id: 0,
        }
    }
}

/// Ordered queue of one owner instance's pending synchronous transactions.
pub struct Limbo<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    config: Mutex<ReplicationConfig>,
    wal: Arc<dyn WalSink>,
}

impl<T: Send> Limbo<T> {
    pub fn new(config: ReplicationConfig, wal: Arc<dyn WalSink>) -> Self {
        Self {
            state: Mutex::new(State::new()),
            cond: Condvar::new(),
            config: Mutex::new(config),
            wal,
        }
    }

    fn config_snapshot(&self) -> ReplicationConfig {
        self.config.lock().unwrap().clone()
    }

    /// Broadcasts so every parked fiber recomputes its deadline and quorum
    /// comparison against whatever was just changed via [`Limbo::update_config`]
    /// (§4.13).
    pub fn on_parameters_change(&self) {
        self.cond.notify_all();
    }

    /// Mutates the live configuration and wakes parked waiters.
    pub fn update_config<F: FnOnce(&mut ReplicationConfig)>(&self, f: F) {
        {
            let mut config = self.config.lock().unwrap();
            f(&mut config);
        }
        self.on_parameters_change();
    }

    /// §4.3 append.
    pub fn append(&self, owner_id: ReplicaId, txn: T, origin: Origin) -> LimboResult<EntryId> {
        let mut state = self.state.lock().unwrap();
        match state.owner_id {
            None => state.owner_id = Some(owner_id),
            Some(existing) => assert_eq!(
                existing, owner_id,
                "limbo is owned by replica {existing}; append for replica {owner_id} is a programming error"
            ),
        }
        if state.in_rollback {
            log::debug!("append rejected: limbo is cascading a rollback");
            return Err(LimboError::CascadingRejection);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push_back(LimboEntry::new(id, txn, origin));
        log::debug!("limbo entry {id} appended for owner {owner_id}");
        Ok(id)
    }

    /// §4.4 `assign_local_lsn`.
    pub fn assign_local_lsn(&self, id: EntryId, lsn: Lsn) {
        let config = self.config_snapshot();
        let confirm_lsn = {
            let mut state = self.state.lock().unwrap();
            let owner = state
                .owner_id
                .expect("assign_local_lsn called before any append established an owner");
            {
                let entry = state
                    .queue
                    .iter_mut()
                    .find(|e| e.id == id)
                    .unwrap_or_else(|| panic!("assign_local_lsn: unknown or already-terminal entry {id}"));
                assert!(
                    matches!(entry.origin, Origin::Local),
                    "assign_local_lsn called on remote-origin entry {id}"
                );
                entry.lsn = Some(lsn);
                entry.ack_count += 1;
            }
            state.clock.set_monotonic(owner, lsn);
            log::debug!("entry {id} assigned local lsn {lsn}; self-ack recorded");
            self.advance_quorum(&mut state, &config)
        };
        if let Some(lsn) = confirm_lsn {
            self.wal.write_confirm(lsn);
        }
        self.cond.notify_all();
    }

    /// §4.4 `assign_remote_lsn`.
    pub fn assign_remote_lsn(&self, id: EntryId, lsn: Lsn) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .queue
            .iter_mut()
            .find(|e| e.id == id)
            .unwrap_or_else(|| panic!("assign_remote_lsn: unknown or already-terminal entry {id}"));
        assert!(
            matches!(entry.origin, Origin::Remote),
            "assign_remote_lsn called on local-origin entry {id}"
        );
        entry.lsn = Some(lsn);
        log::debug!("entry {id} assigned remote lsn {lsn}");
        drop(state);
        self.cond.notify_all();
    }

    /// §4.4 `assign_lsn`, dispatching on the origin recorded at append time
    /// (§9 design note: an explicit tag rather than re-derived context).
    pub fn assign_lsn(&self, id: EntryId, lsn: Lsn) {
        let origin = {
            let state = self.state.lock().unwrap();
            state
                .queue
                .iter()
                .find(|e| e.id == id)
                .map(|e| e.origin)
                .unwrap_or_else(|| panic!("assign_lsn: unknown or already-terminal entry {id}"))
        };
        match origin {
            Origin::Local => self.assign_local_lsn(id, lsn),
            Origin::Remote => self.assign_remote_lsn(id, lsn),
        }
    }

    /// §4.5 ACK fan-in.
    pub fn ack(&self, replica_id: ReplicaId, lsn: Lsn) {
        let config = self.config_snapshot();
        if replica_id == config.owner_id {
            // Open Question 1: silently ignored, matching the source.
            return;
        }
        let confirm_lsn = {
            let mut state = self.state.lock().unwrap();
            if !state.clock.advance(replica_id, lsn) {
                return;
            }
            log::debug!("replica {replica_id} acked lsn {lsn}");
            self.advance_quorum(&mut state, &config)
        };
        if let Some(lsn) = confirm_lsn {
            self.wal.write_confirm(lsn);
        }
        self.cond.notify_all();
    }

    /// Shared quorum re-evaluation used by both the self-ack path
    /// (`assign_local_lsn`) and the replica-ack path (`ack`): pop a
    /// committed prefix off the head while it stays within the quorum
    /// threshold, returning the highest newly-confirmed LSN for a single
    /// aggregated CONFIRM emission (§4.5).
    fn advance_quorum(&self, state: &mut MutexGuard<'_, State<T>>, config: &ReplicationConfig) -> Option<Lsn> {
        let quorum_lsn = state.clock.kth_largest(config.quorum, &config.replicas);
        let mut highest = None;
        while let Some(front) = state.queue.front() {
            if front.status != Status::Pending {
                break;
            }
            match front.lsn {
                Some(l) if l <= quorum_lsn => {
                    let mut committed = state.queue.pop_front().unwrap();
                    committed.status = Status::Committed;
                    state.terminal.insert(committed.id, committed.snapshot());
                    highest = Some(l);
                }
                _ => break,
            }
        }
        if let Some(lsn) = highest {
            log::info!("quorum reached up to lsn {lsn}; emitting CONFIRM");
        }
        highest
    }

    /// Marks the prefix with `lsn <= target` committed without emitting any
    /// WAL record — used by [`Limbo::read_confirm`], which replays an
    /// already-durable CONFIRM.
    fn confirm_prefix(&self, state: &mut MutexGuard<'_, State<T>>, target: Lsn) {
        while let Some(front) = state.queue.front() {
            if front.status != Status::Pending {
                break;
            }
            match front.lsn {
                Some(l) if l <= target => {
                    let mut committed = state.queue.pop_front().unwrap();
                    committed.status = Status::Committed;
                    state.terminal.insert(committed.id, committed.snapshot());
                }
                _ => break,
            }
        }
    }

    /// §4.8 `read_confirm`: a target at or below the already-confirmed
    /// watermark is a no-op (Open Question 2).
    pub fn read_confirm(&self, lsn: Lsn) {
        let mut state = self.state.lock().unwrap();
        self.confirm_prefix(&mut state, lsn);
        drop(state);
        self.cond.notify_all();
    }

    /// Computes the index of the first entry that belongs to the rollback
    /// suffix for `read_rollback(lsn)`: the first entry with an assigned
    /// LSN `>= lsn`, or the first unassigned entry (which is always later
    /// in queue order than every assigned one, invariant 2 of §3).
    fn rollback_cutoff(queue: &VecDeque<LimboEntry<T>>, lsn: Lsn) -> usize {
        for (i, e) in queue.iter().enumerate() {
            match e.lsn {
                Some(l) if l >= lsn => return i,
                Some(_) => continue,
                None => return i,
            }
        }
        queue.len()
    }

    /// Shared rollback protocol (§4.7). `start_fn` computes the suffix
    /// start index freshly after any in-progress rollback has cleared, so
    /// an overlapping trigger naturally re-evaluates and may become a
    /// no-op. The WAL call (when `emit` is set) happens with the lock
    /// dropped, which is what makes `in_rollback` observable to a
    /// concurrent `append` for the scenario in §8, S3.
    fn rollback_suffix(&self, start_fn: impl FnOnce(&VecDeque<LimboEntry<T>>) -> usize, emit: bool) {
        let mut state = self.state.lock().unwrap();
        while state.in_rollback {
            state = self.cond.wait(state).unwrap();
        }
        let start = start_fn(&state.queue);
        if start >= state.queue.len() {
            return;
        }
        state.in_rollback = true;
        let removed: Vec<_> = state.queue.drain(start..).collect();
        let mut lowest: Option<Lsn> = None;
        for mut e in removed.into_iter().rev() {
            e.status = Status::RolledBack;
            state.terminal.insert(e.id, e.snapshot());
            if let Some(l) = e.lsn {
                lowest = Some(lowest.map_or(l, |existing: Lsn| existing.min(l)));
            }
            // Counted per entry, not per rollback event (property 5, §8):
            // a single cascading rollback of N entries advances the
            // counter by N so an external observer can tell how much work
            // was discarded, not merely that some rollback happened.
            state.rollback_count += 1;
        }
        drop(state);

        if emit {
            if let Some(lsn) = lowest {
                self.wal.write_rollback(lsn);
            }
        }

        let mut state = self.state.lock().unwrap();
        state.in_rollback = false;
        drop(state);
        self.cond.notify_all();
    }

    /// §4.7, external trigger: roll back every entry with `lsn >= lsn`,
    /// tail to head. Does not re-emit a WAL record (it was already
    /// received).
    pub fn read_rollback(&self, lsn: Lsn) {
        self.rollback_suffix(|queue| Self::rollback_cutoff(queue, lsn), false);
    }

    /// §4.6 `wait_complete`.
    pub fn wait_complete(&self, id: EntryId) -> LimboResult<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(snap) = state.terminal.get(&id).copied() {
                return Self::terminal_result(snap.status);
            }
            assert!(
                state.queue.iter().any(|e| e.id == id),
                "wait_complete called with unknown entry id {id}"
            );
            let confirm_timeout = self.config_snapshot().confirm_timeout;
            let (guard, result) = self.cond.wait_timeout(state, confirm_timeout).unwrap();
            state = guard;
            if result.timed_out() {
                if let Some(snap) = state.terminal.get(&id).copied() {
                    return Self::terminal_result(snap.status);
                }
                log::warn!("confirm timeout elapsed for entry {id}; initiating rollback");
                drop(state);
                self.rollback_suffix(|queue| queue.iter().position(|e| e.id == id).unwrap_or(queue.len()), true);
                return Err(LimboError::Timeout);
            }
            // Spurious wake or an `on_parameters_change` broadcast: loop
            // back around, recheck terminal status, and recompute the
            // deadline from the (possibly updated) configuration.
        }
    }

    fn terminal_result(status: Status) -> LimboResult<()> {
        match status {
            Status::Committed => Ok(()),
            Status::RolledBack => Err(LimboError::RolledBack),
            Status::Pending => unreachable!("terminal map never holds a Pending status"),
        }
    }

    /// §4.9 `wait_confirm_all`.
    pub fn wait_confirm_all(&self) -> LimboResult<()> {
        let mut state = self.state.lock().unwrap();
        let initial_rollback_count = state.rollback_count;
        let confirm_timeout = self.config_snapshot().confirm_timeout;
        let deadline = Instant::now() + confirm_timeout;
        loop {
            if state.queue.is_empty() {
                return if state.rollback_count == initial_rollback_count {
                    Ok(())
                } else {
                    Err(LimboError::NotAllConfirmed)
                };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LimboError::NotAllConfirmed);
            }
            let (guard, _result) = self.cond.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }

    /// §4.10 `force_empty`. Serializes against an in-progress
    /// network-driven rollback by waiting for it to clear first (Open
    /// Question 3), then confirms the prefix and rolls back the
    /// remainder, in that order, each with its own WAL emission.
    pub fn force_empty(&self, last_confirm: Lsn) {
        {
            let mut state = self.state.lock().unwrap();
            while state.in_rollback {
                state = self.cond.wait(state).unwrap();
            }
        }
        self.wal.write_confirm(last_confirm);
        {
            let mut state = self.state.lock().unwrap();
            self.confirm_prefix(&mut state, last_confirm);
        }
        self.cond.notify_all();
        self.rollback_suffix(|queue| if queue.is_empty() { queue.len() } else { 0 }, true);
    }

    /// Number of rollbacks observed so far (§3, property 5 in §8).
    pub fn rollback_count(&self) -> u64 {
        self.state.lock().unwrap().rollback_count
    }

    /// True once the queue has drained (all entries confirmed or rolled
    /// back and removed).
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }

    /// Read-only view of an entry's bookkeeping, whether it is still
    /// queued or already terminal. Returns `None` once the caller has
    /// called [`Limbo::release`] for it.
    pub fn snapshot(&self, id: EntryId) -> Option<EntrySnapshot> {
        let state = self.state.lock().unwrap();
        if let Some(e) = state.queue.iter().find(|e| e.id == id) {
            return Some(e.snapshot());
        }
        state.terminal.get(&id).copied()
    }

    /// The Rust stand-in for "destroyed by the transaction owner after
    /// observing terminal status" (§3): forgets a terminal entry's
    /// bookkeeping once the caller no longer needs it.
    pub fn release(&self, id: EntryId) {
        self.state.lock().unwrap().terminal.remove(&id);
    }
}
