//! Observable trace events
//!
//! Every meaningful protocol step appends one event to the replay trace. The
//! sequence and content of events is the output contract; the `Display`
//! rendering produces console lines for humans and the serde rendering is
//! used for machine-readable traces. The exact text is not part of the
//! contract.

use crate::types::{ItemId, LockMode, Timestamp, TxnId};
use serde::Serialize;
use std::fmt;

/// Why a transaction aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Wait-Die ruled the transaction younger than a conflicting lock holder.
    Died {
        /// Item the fatal request was made on
        item: ItemId,
        /// The older holder the requester lost to
        killed_by: TxnId,
    },
    /// Abort requested through the manager API.
    Requested,
}

/// One record of the replay trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A transaction registered and received its timestamp.
    Begun {
        /// The new transaction
        tid: TxnId,
        /// Priority timestamp assigned at Begin
        timestamp: Timestamp,
    },
    /// A lock request was granted immediately.
    Granted {
        /// Requesting transaction
        tid: TxnId,
        /// Locked item
        item: ItemId,
        /// Granted mode
        mode: LockMode,
    },
    /// A lock request conflicted with an older holder; the requester queued.
    Queued {
        /// Requesting transaction
        tid: TxnId,
        /// Contended item
        item: ItemId,
        /// Requested mode
        mode: LockMode,
        /// Oldest conflicting holder the requester is waiting on
        waits_for: TxnId,
    },
    /// A transaction aborted; its locks were released and waiters woken.
    Aborted {
        /// The aborted transaction
        tid: TxnId,
        /// Why it aborted
        reason: AbortReason,
    },
    /// A transaction committed; its locks were released and waiters woken.
    Committed {
        /// The committed transaction
        tid: TxnId,
    },
    /// A queued waiter was granted its deferred request and reactivated.
    Resumed {
        /// The reactivated transaction
        tid: TxnId,
        /// Item the deferred request was queued on
        item: ItemId,
        /// Mode the deferred request asked for
        mode: LockMode,
    },
}

impl Event {
    /// The transaction this event belongs to.
    pub fn tid(&self) -> TxnId {
        match self {
            Event::Begun { tid, .. }
            | Event::Granted { tid, .. }
            | Event::Queued { tid, .. }
            | Event::Aborted { tid, .. }
            | Event::Committed { tid }
            | Event::Resumed { tid, .. } => *tid,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Begun { tid, timestamp } => {
                write!(f, "Transaction {tid} begins at TS({timestamp}).")
            }
            Event::Granted { tid, item, mode } => match mode {
                LockMode::Shared => write!(f, "Transaction {tid} reads {item}."),
                LockMode::Exclusive => write!(f, "Transaction {tid} writes {item}."),
            },
            Event::Queued {
                tid,
                item,
                waits_for,
                ..
            } => write!(
                f,
                "Transaction {tid} waits for Transaction {waits_for} to release {item}."
            ),
            Event::Aborted { tid, reason } => match reason {
                AbortReason::Died { item, killed_by } => write!(
                    f,
                    "Transaction {tid} is aborted: it cannot lock {item} held by Transaction {killed_by}."
                ),
                AbortReason::Requested => write!(f, "Transaction {tid} is aborted."),
            },
            Event::Committed { tid } => write!(f, "Transaction {tid} commits."),
            Event::Resumed { tid, item, mode } => write!(
                f,
                "Transaction {tid} resumes with a {mode} lock on {item}."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_simulator_voice() {
        let begun = Event::Begun {
            tid: TxnId(1),
            timestamp: 4,
        };
        assert_eq!(begun.to_string(), "Transaction 1 begins at TS(4).");

        let read = Event::Granted {
            tid: TxnId(1),
            item: ItemId::from("X"),
            mode: LockMode::Shared,
        };
        assert_eq!(read.to_string(), "Transaction 1 reads X.");

        let queued = Event::Queued {
            tid: TxnId(1),
            item: ItemId::from("X"),
            mode: LockMode::Exclusive,
            waits_for: TxnId(2),
        };
        assert_eq!(
            queued.to_string(),
            "Transaction 1 waits for Transaction 2 to release X."
        );

        let died = Event::Aborted {
            tid: TxnId(2),
            reason: AbortReason::Died {
                item: ItemId::from("X"),
                killed_by: TxnId(1),
            },
        };
        assert_eq!(
            died.to_string(),
            "Transaction 2 is aborted: it cannot lock X held by Transaction 1."
        );
    }

    #[test]
    fn test_event_tid() {
        let e = Event::Committed { tid: TxnId(9) };
        assert_eq!(e.tid(), TxnId(9));
    }

    #[test]
    fn test_serialize_tagged() {
        let queued = Event::Queued {
            tid: TxnId(1),
            item: ItemId::from("X"),
            mode: LockMode::Exclusive,
            waits_for: TxnId(2),
        };
        let json = serde_json::to_value(&queued).unwrap();
        assert_eq!(json["event"], "queued");
        assert_eq!(json["tid"], 1);
        assert_eq!(json["item"], "X");
        assert_eq!(json["mode"], "exclusive");
        assert_eq!(json["waits_for"], 2);
    }

    #[test]
    fn test_serialize_abort_reason() {
        let died = Event::Aborted {
            tid: TxnId(2),
            reason: AbortReason::Died {
                item: ItemId::from("X"),
                killed_by: TxnId(1),
            },
        };
        let json = serde_json::to_value(&died).unwrap();
        assert_eq!(json["event"], "aborted");
        assert_eq!(json["reason"]["kind"], "died");
        assert_eq!(json["reason"]["killed_by"], 1);
    }
}
