//! Synchronous-replication limbo and memory-quota gatekeeper.
//!
//! [`limbo::Limbo`] orders one instance's pending synchronous transactions,
//! fans in replica ACKs against a quorum, and drives confirm/rollback
//! decisions, including cascading rollback. [`quota::Quota`] is an
//! unrelated but similarly-shaped byte-budget gatekeeper with FIFO
//! deadline-based waiting. Both follow the same concurrency model: a
//! single internal mutex plus condvar parks with a deadline recomputed
//! from live configuration on every wake.

pub mod clock;
pub mod config;
pub mod error;
pub mod limbo;
pub mod quota;
pub mod wal;

pub use clock::{ClockVector, Lsn, ReplicaId};
pub use config::{QuotaConfig, ReplicationConfig};
pub use error::{LimboError, LimboResult, QuotaError, QuotaResult};
pub use limbo::{EntryId, EntrySnapshot, Limbo, Origin, Status};
pub use quota::Quota;
pub use wal::{RecordingWal, WalRecord, WalSink};
