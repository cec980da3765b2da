//! Transaction records and the transaction table
//!
//! A `Transaction` tracks the state, priority timestamp, held items, and
//! deferred operations of one schedule participant. The `TransactionTable`
//! owns every record and is the only place state transitions happen, so the
//! lifecycle matrix is enforced in exactly one spot.
//!
//! Terminal records are retained rather than removed: the scheduler needs to
//! recognize operations arriving for already-resolved transactions, and tests
//! audit final states.

use lockstep_core::types::{ItemId, Operation, Timestamp, TxnId, TxnState};
use lockstep_core::{Error, Result};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Per-transaction record.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TxnId,
    state: TxnState,
    timestamp: Timestamp,
    /// Items this transaction holds a lock on, in acquisition order.
    ///
    /// Acquisition order makes lock release deterministic, which the replay
    /// trace depends on. The vector is kept duplicate-free; held sets are
    /// small enough that a linear scan beats a hash set here.
    held_items: Vec<ItemId>,
    /// Operations received while `Waiting`, replayed on reactivation.
    pending_ops: VecDeque<Operation>,
}

impl Transaction {
    fn new(id: TxnId, timestamp: Timestamp) -> Self {
        Transaction {
            id,
            state: TxnState::Active,
            timestamp,
            held_items: Vec::new(),
            pending_ops: VecDeque::new(),
        }
    }

    /// Transaction identifier.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Priority timestamp assigned at Begin. Smaller = older.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Items currently held, in acquisition order.
    pub fn held_items(&self) -> &[ItemId] {
        &self.held_items
    }

    /// Whether this transaction holds a lock on `item`.
    pub fn holds(&self, item: &ItemId) -> bool {
        self.held_items.iter().any(|held| held == item)
    }

    /// Number of operations buffered while waiting.
    pub fn pending_len(&self) -> usize {
        self.pending_ops.len()
    }

    /// Record a newly held item. No-op if already recorded (re-entrant
    /// grants and upgrades touch an item that is already held).
    pub(crate) fn record_held(&mut self, item: ItemId) {
        if !self.holds(&item) {
            self.held_items.push(item);
        }
    }

    /// Take the held-item list for release, leaving it empty.
    pub(crate) fn take_held(&mut self) -> Vec<ItemId> {
        std::mem::take(&mut self.held_items)
    }

    /// Buffer an operation that arrived while waiting.
    pub(crate) fn push_pending(&mut self, op: Operation) {
        self.pending_ops.push_back(op);
    }

    /// Pop the next deferred operation for replay.
    pub(crate) fn pop_pending(&mut self) -> Option<Operation> {
        self.pending_ops.pop_front()
    }

    /// Discard all deferred operations (termination).
    pub(crate) fn clear_pending(&mut self) {
        self.pending_ops.clear();
    }
}

/// Table of every transaction the replay has seen.
#[derive(Debug, Default)]
pub struct TransactionTable {
    txns: FxHashMap<TxnId, Transaction>,
}

impl TransactionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction as `Active` with the given timestamp.
    ///
    /// Returns `false` without touching the table if the id is already
    /// known; a repeated Begin is a no-op, not an error.
    pub fn begin(&mut self, tid: TxnId, timestamp: Timestamp) -> bool {
        if self.txns.contains_key(&tid) {
            return false;
        }
        self.txns.insert(tid, Transaction::new(tid, timestamp));
        true
    }

    /// Look up a transaction without failing.
    pub fn lookup(&self, tid: TxnId) -> Option<&Transaction> {
        self.txns.get(&tid)
    }

    /// Fetch a transaction, failing with `UnknownTransaction` if absent.
    ///
    /// Every operation other than Begin requires a prior Begin for its id.
    pub fn get(&self, tid: TxnId) -> Result<&Transaction> {
        self.txns
            .get(&tid)
            .ok_or(Error::UnknownTransaction(tid))
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, tid: TxnId) -> Result<&mut Transaction> {
        self.txns
            .get_mut(&tid)
            .ok_or(Error::UnknownTransaction(tid))
    }

    /// Move a transaction to `next`, enforcing the lifecycle matrix.
    ///
    /// # Errors
    /// `UnknownTransaction` if the id was never begun; `IllegalTransition`
    /// if the matrix forbids the move (notably any transition out of a
    /// terminal state). The latter is a defect and should end the run.
    pub fn transition(&mut self, tid: TxnId, next: TxnState) -> Result<()> {
        let txn = self.get_mut(tid)?;
        if !txn.state.can_transition_to(next) {
            return Err(Error::IllegalTransition {
                tid,
                from: txn.state,
                to: next,
            });
        }
        txn.state = next;
        Ok(())
    }

    /// Number of known transactions, terminal ones included.
    pub fn len(&self) -> usize {
        self.txns.len()
    }

    /// Whether no transaction has begun yet.
    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }

    /// Iterate over all records.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.txns.values()
    }

    /// Whether every known transaction has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.txns.values().all(|t| t.state.is_terminal())
    }
}
