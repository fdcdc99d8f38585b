//! One pending synchronous transaction and its ACK bookkeeping.

use crate::clock::Lsn;

/// Stable handle callers use to refer back to an appended entry. Plays the
/// role the original design's intrusive `rlist` link plays: a cheap,
/// copyable reference into limbo-owned storage (§9, "owning container
/// indexed by a stable handle").
pub type EntryId = u64;

/// Whether a queued entry's transaction originated on this limbo's own
/// instance or arrived from elsewhere (recovery/apply). Recorded explicitly
/// at `append` time rather than re-derived from ambient context, since the
/// Rust caller always knows this statically (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Terminal/non-terminal status of a limbo entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Committed,
    RolledBack,
}

impl Status {
    pub fn is_complete(self) -> bool {
        matches!(self, Status::Committed | Status::RolledBack)
    }
}

/// Internal queue element. `txn` is the caller's opaque handle; the limbo
/// never inspects it beyond moving it around and handing it back.
pub(crate) struct LimboEntry<T> {
    pub(crate) id: EntryId,
    pub(crate) txn: T,
    pub(crate) origin: Origin,
    /// `None` models the original `-1`: not yet assigned (WAL write
    /// pending).
    pub(crate) lsn: Option<Lsn>,
    pub(crate) ack_count: u32,
    pub(crate) status: Status,
}

impl<T> LimboEntry<T> {
    pub(crate) fn new(id: EntryId, txn: T, origin: Origin) -> Self {
        Self {
            id,
            txn,
            origin,
            lsn: None,
            ack_count: 0,
            status: Status::Pending,
        }
    }

    pub(crate) fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            lsn: self.lsn,
            ack_count: self.ack_count,
            status: self.status,
        }
    }
}

/// A point-in-time, read-only view of an entry's bookkeeping fields, for
/// callers that want to observe state without taking ownership of the
/// transaction handle (tests, diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub lsn: Option<Lsn>,
    pub ack_count: u32,
    pub status: Status,
}

impl EntrySnapshot {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }
}
