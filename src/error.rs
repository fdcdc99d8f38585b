//! Error types for the limbo and quota cores.
//!
//! Mirrors the crate-wide convention of a hand-rolled enum per subsystem that
//! implements `Display`/`Error` directly, rather than reaching for a derive
//! macro. Conditions that the originating design treats as programming
//! errors (monotonicity violations, releasing more quota than was used,
//! appending to a limbo owned by a different instance) are not represented
//! here at all: they panic at the call site instead of being threaded
//! through `Result`.

use std::fmt;

/// Errors returned by [`crate::limbo::Limbo`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimboError {
    /// `wait_complete` hit the confirm timeout (or the waiting fiber was
    /// cancelled) before the entry reached a terminal state. The caller
    /// already observes the entry as `rolled_back` by the time this is
    /// returned; the variant exists so call sites can log the distinct
    /// cause.
    Timeout,
    /// The entry was rolled back for a reason other than this wait timing
    /// out (e.g. a cascading rollback triggered by an earlier entry, or an
    /// externally received ROLLBACK record).
    RolledBack,
    /// `append` was called while the limbo is actively unwinding a
    /// cascading rollback. The caller must abort the transaction; the
    /// entry was never queued.
    CascadingRejection,
    /// `wait_confirm_all` observed a rollback during the wait window.
    NotAllConfirmed,
}

impl fmt::Display for LimboError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimboError::Timeout => write!(f, "confirm timeout elapsed before quorum was reached"),
            LimboError::RolledBack => write!(f, "transaction was rolled back"),
            LimboError::CascadingRejection => {
                write!(f, "limbo is rolling back; new transactions are rejected")
            }
            LimboError::NotAllConfirmed => {
                write!(f, "not all limbo entries confirmed before the wait window closed")
            }
        }
    }
}

impl std::error::Error for LimboError {}

/// Errors returned by [`crate::quota::Quota`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    /// The acquisition deadline elapsed before enough quota became
    /// available. No quota was accounted for this caller.
    TimedOut,
}

impl fmt::Display for QuotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaError::TimedOut => write!(f, "timed out waiting for quota"),
        }
    }
}

impl std::error::Error for QuotaError {}

/// Result alias for limbo operations.
pub type LimboResult<T> = std::result::Result<T, LimboError>;

/// Result alias for quota operations.
pub type QuotaResult<T> = std::result::Result<T, QuotaError>;
