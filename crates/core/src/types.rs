//! Identifiers, lock modes, and transaction states
//!
//! These are the fixed tagged records the whole system agrees on. The
//! schedule refers to transactions and items by name; locks and transactions
//! carry exhaustive enumerated `mode`/`state` fields rather than optional
//! attributes, so an absent value is always an explicit variant.

use serde::Serialize;
use std::fmt;

/// Logical timestamp assigned to a transaction at Begin.
///
/// Timestamps come from the scheduler's monotonic clock, so they are unique
/// and totally ordered. A smaller timestamp means an older transaction, and
/// older transactions have higher priority under Wait-Die.
pub type Timestamp = u64;

/// Transaction identifier taken from the schedule (`b1;` begins transaction 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data item identifier (`r1(X);` reads item `X`).
///
/// Items are opaque names; the replay never touches item contents, only the
/// lock state attached to the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create an item id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        ItemId(name.into())
    }

    /// The item name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(name: &str) -> Self {
        ItemId::new(name)
    }
}

/// Lock modes for read/write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared lock for reads (multiple readers allowed).
    Shared,
    /// Exclusive lock for writes (single writer, no readers).
    Exclusive,
}

impl LockMode {
    /// Whether two locks in these modes can be held on the same item by
    /// different transactions at the same time. Only shared readers coexist.
    pub fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether a lock already held in `self` mode satisfies a request for
    /// `requested` mode without any table change. An exclusive lock covers
    /// everything; a shared lock covers shared requests.
    pub fn covers(self, requested: LockMode) -> bool {
        self == LockMode::Exclusive || requested == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => f.write_str("shared"),
            LockMode::Exclusive => f.write_str("exclusive"),
        }
    }
}

/// Lifecycle state of a transaction.
///
/// State transitions:
/// - `Active` → `Waiting` (queued on a conflicting lock)
/// - `Active` → `Aborted` (Wait-Die death or requested abort)
/// - `Active` → `Committed` (End)
/// - `Waiting` → `Active` (reactivated by a release)
/// - `Waiting` → `Aborted` (aborted while queued)
///
/// `Aborted` and `Committed` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    /// Executing; lock requests are evaluated immediately.
    Active,
    /// Queued on a lock; further operations are buffered.
    Waiting,
    /// Terminated without committing.
    Aborted,
    /// Terminated successfully.
    Committed,
}

impl TxnState {
    /// Whether this state accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Aborted | TxnState::Committed)
    }

    /// Whether moving from this state to `next` is a legal transition.
    pub fn can_transition_to(self, next: TxnState) -> bool {
        matches!(
            (self, next),
            (
                TxnState::Active,
                TxnState::Waiting | TxnState::Aborted | TxnState::Committed
            ) | (TxnState::Waiting, TxnState::Active | TxnState::Aborted)
        )
    }
}

/// One operation from the schedule, without its transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `b<id>;`: register the transaction and stamp its timestamp.
    Begin,
    /// `r<id>(item);`: acquire a shared lock on `item`.
    Read(ItemId),
    /// `w<id>(item);`: acquire an exclusive lock on `item`.
    Write(ItemId),
    /// `e<id>;`: commit and release all held locks.
    End,
}

impl Operation {
    /// The item this operation touches, if any.
    pub fn item(&self) -> Option<&ItemId> {
        match self {
            Operation::Read(item) | Operation::Write(item) => Some(item),
            Operation::Begin | Operation::End => None,
        }
    }

    /// The lock mode this operation requests, if it requests one.
    pub fn lock_mode(&self) -> Option<LockMode> {
        match self {
            Operation::Read(_) => Some(LockMode::Shared),
            Operation::Write(_) => Some(LockMode::Exclusive),
            Operation::Begin | Operation::End => None,
        }
    }
}

/// A parsed schedule line: which transaction performs which operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Transaction the operation belongs to.
    pub tid: TxnId,
    /// The operation itself.
    pub op: Operation,
}

impl Statement {
    /// Convenience constructor.
    pub fn new(tid: TxnId, op: Operation) -> Self {
        Statement { tid, op }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_compatibility() {
        assert!(LockMode::Shared.compatible_with(LockMode::Shared));
        assert!(!LockMode::Shared.compatible_with(LockMode::Exclusive));
        assert!(!LockMode::Exclusive.compatible_with(LockMode::Shared));
        assert!(!LockMode::Exclusive.compatible_with(LockMode::Exclusive));
    }

    #[test]
    fn test_mode_covers() {
        assert!(LockMode::Exclusive.covers(LockMode::Shared));
        assert!(LockMode::Exclusive.covers(LockMode::Exclusive));
        assert!(LockMode::Shared.covers(LockMode::Shared));
        assert!(!LockMode::Shared.covers(LockMode::Exclusive));
    }

    #[test]
    fn test_legal_transitions() {
        use TxnState::*;
        assert!(Active.can_transition_to(Waiting));
        assert!(Active.can_transition_to(Aborted));
        assert!(Active.can_transition_to(Committed));
        assert!(Waiting.can_transition_to(Active));
        assert!(Waiting.can_transition_to(Aborted));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        use TxnState::*;
        for terminal in [Aborted, Committed] {
            assert!(terminal.is_terminal());
            for next in [Active, Waiting, Aborted, Committed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        // Waiting cannot commit directly; it must be reactivated first.
        assert!(!Waiting.can_transition_to(Committed));
        assert!(!Waiting.can_transition_to(Waiting));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_operation_accessors() {
        let read = Operation::Read(ItemId::from("X"));
        assert_eq!(read.item().map(ItemId::as_str), Some("X"));
        assert_eq!(read.lock_mode(), Some(LockMode::Shared));

        let write = Operation::Write(ItemId::from("Y"));
        assert_eq!(write.lock_mode(), Some(LockMode::Exclusive));

        assert_eq!(Operation::Begin.item(), None);
        assert_eq!(Operation::End.lock_mode(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TxnId(7).to_string(), "7");
        assert_eq!(ItemId::from("X").to_string(), "X");
        assert_eq!(LockMode::Shared.to_string(), "shared");
        assert_eq!(LockMode::Exclusive.to_string(), "exclusive");
    }
}
