//! The lock manager: requests, releases, and cascading wake-ups
//!
//! `LockManager` owns both tables and is the single entry point for every
//! mutation. A request is evaluated by the conflict resolver and applied
//! here; commits, aborts, and Wait-Die deaths all funnel into the release
//! engine, which processes an explicit work agenda to a fixed point:
//!
//! - `Release` tasks hand back a terminated transaction's items one at a
//!   time, promoting compatible waiters at the front of each freed queue.
//! - `Replay` tasks re-run a reactivated waiter's buffered operations, which
//!   may grant, queue again, commit, or die, pushing further tasks.
//!
//! Tasks spawned by a step run before the remainder of that step's release
//! (front of the agenda), so a reactivated waiter replays its deferred work
//! before the next item is handed back, and an abort's cleanup completes
//! before anything else proceeds. Termination: every task chain strictly
//! decreases the number of active-or-waiting transactions or the amount of
//! queued work, so the agenda always drains.
//!
//! Re-entering a transaction's release twice is impossible by construction:
//! a release is only seeded by a terminal transition, and the transition
//! matrix rejects terminal-to-terminal moves before any task is queued.

use crate::conflict::{self, Decision, Outcome};
use crate::lock::LockTable;
use crate::transaction::TransactionTable;
use lockstep_core::event::{AbortReason, Event};
use lockstep_core::types::{ItemId, LockMode, Operation, Timestamp, TxnId, TxnState};
use lockstep_core::{Error, Result};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const TRACE_TARGET: &str = "lockstep::lock";

/// One unit of deferred work for the release engine.
#[derive(Debug)]
enum Task {
    /// Hand back the remaining held items of a terminated transaction.
    Release {
        tid: TxnId,
        items: VecDeque<ItemId>,
    },
    /// Replay the buffered operations of a freshly reactivated waiter.
    Replay { tid: TxnId },
}

/// Lock manager enforcing strict 2PL with Wait-Die.
///
/// Owns the lock table and the transaction table; all grant and wake-up
/// logic spans both atomically, which is why they live behind one `&mut`
/// surface. Appends every observable step to the replay trace.
#[derive(Debug, Default)]
pub struct LockManager {
    txns: TransactionTable,
    locks: LockTable,
    trace: Vec<Event>,
}

impl LockManager {
    /// Create a manager with empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the transaction table.
    pub fn transactions(&self) -> &TransactionTable {
        &self.txns
    }

    /// Read access to the lock table.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// The trace accumulated so far.
    pub fn trace(&self) -> &[Event] {
        &self.trace
    }

    /// Take the accumulated trace, leaving it empty.
    pub fn drain_trace(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.trace)
    }

    /// Whether every lock has been released.
    pub fn is_quiescent(&self) -> bool {
        self.locks.is_empty()
    }

    /// Register a transaction with its priority timestamp.
    ///
    /// Returns `true` if the transaction is new, `false` for a repeated
    /// Begin of a live transaction (a no-op).
    ///
    /// # Errors
    /// `MalformedOperation` for a Begin naming an id that already
    /// terminated; ids are never reused.
    pub fn begin(&mut self, tid: TxnId, timestamp: Timestamp) -> Result<bool> {
        if let Some(txn) = self.txns.lookup(tid) {
            if txn.state().is_terminal() {
                return Err(Error::MalformedOperation(format!(
                    "begin for terminated transaction {tid}"
                )));
            }
            return Ok(false);
        }
        self.txns.begin(tid, timestamp);
        debug!(target: TRACE_TARGET, %tid, timestamp, "transaction begins");
        self.trace.push(Event::Begun { tid, timestamp });
        Ok(true)
    }

    /// Request a lock on `item` in `mode` for an active transaction.
    ///
    /// Returns the outcome after all side effects have completed,
    /// including, for a Wait-Die death, the full release of the requester's
    /// locks and any cascading wake-ups.
    ///
    /// # Errors
    /// `UnknownTransaction` if `tid` never began; `IllegalTransition` if
    /// `tid` is not `Active` (the scheduler buffers or discards operations
    /// for non-active transactions, so reaching here is a protocol bug).
    pub fn request(&mut self, tid: TxnId, item: &ItemId, mode: LockMode) -> Result<Outcome> {
        let mut agenda = VecDeque::new();
        let outcome = self.submit(tid, item, mode, &mut agenda)?;
        self.drive(agenda)?;
        Ok(outcome)
    }

    /// Commit an active transaction: release every held lock and wake
    /// eligible waiters before returning.
    pub fn commit(&mut self, tid: TxnId) -> Result<()> {
        let mut agenda = VecDeque::new();
        self.finish_commit(tid, &mut agenda)?;
        self.drive(agenda)
    }

    /// Abort a transaction on request (valid from `Active` or `Waiting`),
    /// releasing its locks, scrubbing it from wait queues, and waking
    /// eligible waiters before returning.
    pub fn abort(&mut self, tid: TxnId) -> Result<()> {
        let mut agenda = VecDeque::new();
        self.txns.transition(tid, TxnState::Aborted)?;
        info!(target: TRACE_TARGET, %tid, "transaction aborted on request");
        self.trace.push(Event::Aborted {
            tid,
            reason: AbortReason::Requested,
        });
        self.retire(tid, &mut agenda)?;
        self.drive(agenda)
    }

    /// Buffer an operation for a waiting transaction, to be replayed when
    /// it is reactivated.
    pub fn buffer(&mut self, tid: TxnId, op: Operation) -> Result<()> {
        let txn = self.txns.get_mut(tid)?;
        debug!(target: TRACE_TARGET, %tid, ?op, "operation deferred while waiting");
        txn.push_pending(op);
        Ok(())
    }

    // === Request evaluation ===

    /// Evaluate one request and apply its outcome. Cascade work triggered by
    /// a death goes on `agenda`; the caller is responsible for driving it.
    fn submit(
        &mut self,
        tid: TxnId,
        item: &ItemId,
        mode: LockMode,
        agenda: &mut VecDeque<Task>,
    ) -> Result<Outcome> {
        let txn = self.txns.get(tid)?;
        if txn.state() != TxnState::Active {
            return Err(Error::IllegalTransition {
                tid,
                from: txn.state(),
                to: TxnState::Active,
            });
        }

        let Some(lock) = self.locks.get(item) else {
            self.locks.insert_fresh(item.clone(), tid, mode);
            self.txns.get_mut(tid)?.record_held(item.clone());
            debug!(target: TRACE_TARGET, %tid, %item, %mode, "lock granted");
            self.trace.push(Event::Granted {
                tid,
                item: item.clone(),
                mode,
            });
            return Ok(Outcome::Granted);
        };

        match conflict::resolve(&self.txns, lock, tid, mode)? {
            Decision::Grant => {
                if let Some(lock) = self.locks.get_mut(item) {
                    lock.grant(tid, mode);
                }
                self.txns.get_mut(tid)?.record_held(item.clone());
                debug!(target: TRACE_TARGET, %tid, %item, %mode, "lock granted");
                self.trace.push(Event::Granted {
                    tid,
                    item: item.clone(),
                    mode,
                });
                Ok(Outcome::Granted)
            }
            Decision::Queue { waits_for } => {
                if let Some(lock) = self.locks.get_mut(item) {
                    lock.enqueue(tid, mode);
                }
                self.txns.transition(tid, TxnState::Waiting)?;
                debug!(
                    target: TRACE_TARGET,
                    %tid, %item, %mode, %waits_for, "request queued"
                );
                self.trace.push(Event::Queued {
                    tid,
                    item: item.clone(),
                    mode,
                    waits_for,
                });
                Ok(Outcome::Queued)
            }
            Decision::Die { killed_by } => {
                self.txns.transition(tid, TxnState::Aborted)?;
                warn!(
                    target: TRACE_TARGET,
                    %tid, %item, %killed_by, "wait-die abort"
                );
                self.trace.push(Event::Aborted {
                    tid,
                    reason: AbortReason::Died {
                        item: item.clone(),
                        killed_by,
                    },
                });
                self.retire(tid, agenda)?;
                Ok(Outcome::Aborted)
            }
        }
    }

    // === Release & wake-up engine ===

    /// Common cleanup for a transaction that just reached a terminal state:
    /// drop buffered work, leave any wait queue, and schedule the release of
    /// its held items at the front of the agenda.
    fn retire(&mut self, tid: TxnId, agenda: &mut VecDeque<Task>) -> Result<()> {
        let txn = self.txns.get_mut(tid)?;
        txn.clear_pending();
        let items: VecDeque<ItemId> = txn.take_held().into();
        self.locks.scrub_waiter(tid);
        agenda.push_front(Task::Release { tid, items });
        Ok(())
    }

    /// Terminal transition + trace for a commit; release work goes on the
    /// agenda. Shared by the public `commit` and End replay.
    fn finish_commit(&mut self, tid: TxnId, agenda: &mut VecDeque<Task>) -> Result<()> {
        self.txns.transition(tid, TxnState::Committed)?;
        info!(target: TRACE_TARGET, %tid, "transaction committed");
        self.trace.push(Event::Committed { tid });

        let txn = self.txns.get_mut(tid)?;
        txn.clear_pending();
        let items: VecDeque<ItemId> = txn.take_held().into();
        agenda.push_front(Task::Release { tid, items });
        Ok(())
    }

    /// Process the agenda to a fixed point.
    fn drive(&mut self, mut agenda: VecDeque<Task>) -> Result<()> {
        while let Some(task) = agenda.pop_front() {
            match task {
                Task::Release { tid, mut items } => {
                    let Some(item) = items.pop_front() else {
                        continue;
                    };
                    let woken = self.release_one(tid, &item)?;
                    // Reactivated waiters replay before the next item is
                    // handed back: [Replay w1, .., Replay wn, Release rest].
                    if !items.is_empty() {
                        agenda.push_front(Task::Release { tid, items });
                    }
                    for woken_tid in woken.into_iter().rev() {
                        agenda.push_front(Task::Replay { tid: woken_tid });
                    }
                }
                Task::Replay { tid } => self.replay(tid, &mut agenda)?,
            }
        }
        Ok(())
    }

    /// Remove `tid` from `item`'s holder set and promote eligible waiters.
    ///
    /// Promotion walks the queue in FIFO order, granting every front waiter
    /// whose request is admissible against the remaining holders (several
    /// shared waiters together; an incompatible waiter stops the walk).
    /// Checking admissibility after *every* holder removal, not only when
    /// the holder set empties, is what un-strands a queued upgrade whose
    /// requester is itself the last remaining holder. Promotion never
    /// re-applies the die rule: that was settled when the waiter queued.
    ///
    /// Returns the reactivated transactions in grant order.
    fn release_one(&mut self, tid: TxnId, item: &ItemId) -> Result<Vec<TxnId>> {
        let Some(lock) = self.locks.get_mut(item) else {
            return Ok(Vec::new());
        };
        lock.remove_holder(tid);
        debug!(target: TRACE_TARGET, %tid, %item, "lock released");

        let mut woken = Vec::new();
        loop {
            let Some(waiter) = lock.front_waiter() else {
                break;
            };
            if !lock.admissible(waiter.tid, waiter.mode) {
                break;
            }
            lock.dequeue_waiter();
            lock.grant(waiter.tid, waiter.mode);
            self.txns.transition(waiter.tid, TxnState::Active)?;
            self.txns.get_mut(waiter.tid)?.record_held(item.clone());
            debug!(
                target: TRACE_TARGET,
                tid = %waiter.tid, %item, mode = %waiter.mode, "waiter reactivated"
            );
            self.trace.push(Event::Resumed {
                tid: waiter.tid,
                item: item.clone(),
                mode: waiter.mode,
            });
            woken.push(waiter.tid);
        }

        self.locks.remove_if_unused(item);
        Ok(woken)
    }

    /// Replay the buffered operations of a reactivated waiter until they are
    /// exhausted or the transaction leaves `Active` again (re-queued,
    /// committed, or killed).
    fn replay(&mut self, tid: TxnId, agenda: &mut VecDeque<Task>) -> Result<()> {
        loop {
            let txn = self.txns.get_mut(tid)?;
            if txn.state() != TxnState::Active {
                break;
            }
            let Some(op) = txn.pop_pending() else {
                break;
            };
            match op {
                Operation::Begin => {} // replays as a no-op
                Operation::Read(item) => {
                    self.submit(tid, &item, LockMode::Shared, agenda)?;
                }
                Operation::Write(item) => {
                    self.submit(tid, &item, LockMode::Exclusive, agenda)?;
                }
                Operation::End => {
                    self.finish_commit(tid, agenda)?;
                    break;
                }
            }
        }
        Ok(())
    }
}
