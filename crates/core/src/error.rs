//! Error types for schedule replay
//!
//! The taxonomy is deliberately small. Wait-Die aborts are protocol outcomes,
//! not errors; they are reported through the event trace. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.

use crate::types::{TxnId, TxnState};
use thiserror::Error;

/// Result type alias for lockstep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schedule replay
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An operation references a transaction id that never began.
    #[error("unknown transaction {0}: operation without a prior begin")]
    UnknownTransaction(TxnId),

    /// A state transition that the lifecycle matrix forbids, most notably
    /// any transition out of a terminal state. This is an internal invariant
    /// violation: the tables can no longer be trusted once it occurs.
    #[error("illegal transition for transaction {tid}: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Transaction whose transition was rejected
        tid: TxnId,
        /// State the transaction was in
        from: TxnState,
        /// State the transition asked for
        to: TxnState,
    },

    /// A schedule statement that does not match the `op id (item);` grammar,
    /// or a Begin for an id that already terminated.
    #[error("malformed operation: {0:?}")]
    MalformedOperation(String),
}

impl Error {
    /// Whether the replay may continue after logging this error.
    ///
    /// `UnknownTransaction` and `MalformedOperation` poison only the
    /// offending statement. `IllegalTransition` indicates corrupted state and
    /// must end the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::IllegalTransition { .. })
    }
}
