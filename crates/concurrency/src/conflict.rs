//! Wait-Die conflict resolution
//!
//! Given one lock request and the current lock/transaction state, decide
//! whether the requester is granted, queued, or killed. The resolver is
//! stateless: it inspects the tables and returns a decision; applying the
//! decision is the manager's job.
//!
//! The priority order is the Begin timestamp: strictly older (smaller
//! timestamp) transactions never die to strictly younger ones. On conflict
//! the requester is compared against everyone it would wait behind: the
//! conflicting holders *and* the transactions already queued on the item.
//! If the requester is older than all of them it queues, otherwise it dies.
//! Counting queued waiters keeps every wait edge pointing from an older
//! transaction to a younger one, so waits-for chains carry strictly
//! increasing timestamps and can never close into a deadlock cycle.
//! Timestamps are unique, so ties cannot occur.

use crate::lock::Lock;
use crate::transaction::TransactionTable;
use lockstep_core::types::{LockMode, Timestamp, TxnId};
use lockstep_core::Result;

/// Result of a lock request, as seen by the caller of
/// [`LockManager::request`](crate::manager::LockManager::request).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The lock was granted; the requester stays `Active`.
    Granted,
    /// The requester was appended to the item's wait queue and is `Waiting`.
    Queued,
    /// Wait-Die killed the requester; it is `Aborted` and its locks are gone.
    Aborted,
}

/// Internal decision for one request against one lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// No conflict: fresh grant, shared join, re-entry, or sole-holder
    /// upgrade.
    Grant,
    /// Conflict, requester older than every conflicting holder and every
    /// queued waiter: it waits.
    Queue {
        /// Oldest conflicting holder, reported in the trace.
        waits_for: TxnId,
    },
    /// Conflict, requester younger than a conflicting holder or a queued
    /// waiter: it dies.
    Die {
        /// Oldest of the transactions ahead of the requester; always
        /// strictly older than the requester.
        killed_by: TxnId,
    },
}

/// Decide one request against an existing lock record.
///
/// The decision procedure, in order:
/// 1. Requester already holds the item: a covered mode re-enters, a sole
///    holder upgrades, an upgrade alongside other readers is a conflict
///    against those readers.
/// 2. Shared request against a shared lock: join, shared readers never
///    block each other.
/// 3. Otherwise Wait-Die against the conflicting holders and the queued
///    waiters the requester would line up behind.
pub(crate) fn resolve(
    txns: &TransactionTable,
    lock: &Lock,
    tid: TxnId,
    mode: LockMode,
) -> Result<Decision> {
    if lock.holds(tid) {
        if lock.mode().covers(mode) || lock.is_sole_holder(tid) {
            return Ok(Decision::Grant);
        }
        // Upgrade while other readers hold the item: conflict against them.
        return wait_die(txns, lock, tid);
    }
    if lock.mode().compatible_with(mode) {
        return Ok(Decision::Grant);
    }
    wait_die(txns, lock, tid)
}

/// Apply the Wait-Die rule against everyone ahead of `tid` on this lock:
/// the holders other than `tid`, plus the queued waiters.
fn wait_die(txns: &TransactionTable, lock: &Lock, tid: TxnId) -> Result<Decision> {
    let requester_ts = txns.get(tid)?.timestamp();

    let mut oldest_holder: Option<(TxnId, Timestamp)> = None;
    for &holder in lock.holders() {
        if holder == tid {
            continue;
        }
        let ts = txns.get(holder)?.timestamp();
        if oldest_holder.is_none() || oldest_holder.is_some_and(|(_, best)| ts < best) {
            oldest_holder = Some((holder, ts));
        }
    }

    // A conflict with no other holder cannot arise from the decision
    // procedure above; treat it as a grant rather than panic.
    let Some((holder, holder_ts)) = oldest_holder else {
        return Ok(Decision::Grant);
    };

    let mut oldest = (holder, holder_ts);
    for waiter in lock.waiters() {
        if waiter.tid == tid {
            continue;
        }
        let ts = txns.get(waiter.tid)?.timestamp();
        if ts < oldest.1 {
            oldest = (waiter.tid, ts);
        }
    }

    if requester_ts < oldest.1 {
        Ok(Decision::Queue { waits_for: holder })
    } else {
        Ok(Decision::Die { killed_by: oldest.0 })
    }
}
