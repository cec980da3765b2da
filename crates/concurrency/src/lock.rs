//! Lock records and the lock table
//!
//! One `Lock` exists per contended item: its mode, the set of holders, and a
//! FIFO queue of deferred requests. The table enforces the structural
//! invariants: an exclusive lock has exactly one holder, and a record with
//! no holders and no waiters is deleted rather than left dangling.
//!
//! The mutators here preserve structure only; deciding *whether* a request
//! may join, upgrade, queue, or die is the conflict resolver's job.

use lockstep_core::types::{ItemId, LockMode, TxnId};
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;

/// A deferred lock request sitting in an item's wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    /// The queued transaction.
    pub tid: TxnId,
    /// The mode it originally requested.
    pub mode: LockMode,
}

/// Per-item lock record.
#[derive(Debug, Clone)]
pub struct Lock {
    mode: LockMode,
    /// Holder set: exactly one entry under `Exclusive`, any number under
    /// `Shared`. Almost always one or two entries, hence the small vector.
    holders: SmallVec<[TxnId; 2]>,
    /// Deferred requests in arrival order.
    wait_queue: VecDeque<Waiter>,
}

impl Lock {
    fn new(tid: TxnId, mode: LockMode) -> Self {
        let mut holders = SmallVec::new();
        holders.push(tid);
        Lock {
            mode,
            holders,
            wait_queue: VecDeque::new(),
        }
    }

    /// Current lock mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Current holders. Size 1 under `Exclusive`.
    pub fn holders(&self) -> &[TxnId] {
        &self.holders
    }

    /// Queued waiters in arrival order.
    pub fn waiters(&self) -> impl Iterator<Item = &Waiter> {
        self.wait_queue.iter()
    }

    /// Whether `tid` is among the holders.
    pub fn holds(&self, tid: TxnId) -> bool {
        self.holders.contains(&tid)
    }

    /// Whether `tid` is the one and only holder.
    pub fn is_sole_holder(&self, tid: TxnId) -> bool {
        self.holders.len() == 1 && self.holders[0] == tid
    }

    /// Whether a request by `tid` for `mode` could be granted against the
    /// current holder set without conflict: the set is empty, the request
    /// joins compatible shared readers, `tid` already holds a covering lock,
    /// or `tid` is the sole holder asking to upgrade.
    pub fn admissible(&self, tid: TxnId, mode: LockMode) -> bool {
        if self.holders.is_empty() {
            return true;
        }
        if self.holds(tid) {
            return self.mode.covers(mode) || self.is_sole_holder(tid);
        }
        self.mode.compatible_with(mode)
    }

    /// Grant an admissible request, mutating mode and holders accordingly.
    ///
    /// Callers must have checked [`admissible`](Self::admissible); the grant
    /// itself only distinguishes take-over, join, upgrade, and re-entry.
    pub(crate) fn grant(&mut self, tid: TxnId, mode: LockMode) {
        if self.holders.is_empty() {
            self.mode = mode;
            self.holders.push(tid);
        } else if !self.holds(tid) {
            // Shared join; mode stays Shared.
            self.holders.push(tid);
        } else if mode == LockMode::Exclusive && self.mode == LockMode::Shared {
            // Sole-holder upgrade.
            self.mode = LockMode::Exclusive;
        }
        // Re-entrant grant under a covering mode changes nothing.
    }

    /// Remove `tid` from the holder set. Returns whether it was a holder.
    pub(crate) fn remove_holder(&mut self, tid: TxnId) -> bool {
        let before = self.holders.len();
        self.holders.retain(|h| *h != tid);
        self.holders.len() != before
    }

    /// Append a deferred request.
    pub(crate) fn enqueue(&mut self, tid: TxnId, mode: LockMode) {
        self.wait_queue.push_back(Waiter { tid, mode });
    }

    /// The front of the wait queue, if any.
    pub(crate) fn front_waiter(&self) -> Option<Waiter> {
        self.wait_queue.front().copied()
    }

    /// Pop the front waiter.
    pub(crate) fn dequeue_waiter(&mut self) -> Option<Waiter> {
        self.wait_queue.pop_front()
    }

    /// Drop every queue entry belonging to `tid`.
    pub(crate) fn scrub_waiter(&mut self, tid: TxnId) {
        self.wait_queue.retain(|w| w.tid != tid);
    }

    /// Whether the record carries no holders and no waiters and must be
    /// deleted from the table.
    pub fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.wait_queue.is_empty()
    }
}

/// Read-only snapshot of one lock record, for dumps and assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockView {
    /// The locked item.
    pub item: ItemId,
    /// Current mode.
    pub mode: LockMode,
    /// Current holders.
    pub holders: Vec<TxnId>,
    /// Queued waiters in arrival order.
    pub waiters: Vec<TxnId>,
}

impl fmt::Display for LockView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} held by [", self.item, self.mode)?;
        for (i, tid) in self.holders.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tid}")?;
        }
        f.write_str("]")?;
        if !self.waiters.is_empty() {
            f.write_str(", waiting [")?;
            for (i, tid) in self.waiters.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{tid}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Table of every currently locked item.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: FxHashMap<ItemId, Lock>,
}

impl LockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the lock record for `item`.
    pub fn get(&self, item: &ItemId) -> Option<&Lock> {
        self.locks.get(item)
    }

    /// Mutable lookup.
    pub(crate) fn get_mut(&mut self, item: &ItemId) -> Option<&mut Lock> {
        self.locks.get_mut(item)
    }

    /// Create a fresh record for an unlocked item with `tid` as holder.
    pub(crate) fn insert_fresh(&mut self, item: ItemId, tid: TxnId, mode: LockMode) {
        self.locks.insert(item, Lock::new(tid, mode));
    }

    /// Delete the record for `item` if it has no holders and no waiters.
    pub(crate) fn remove_if_unused(&mut self, item: &ItemId) {
        if self.locks.get(item).is_some_and(Lock::is_unused) {
            self.locks.remove(item);
        }
    }

    /// Drop `tid` from every wait queue, deleting records that become
    /// unused. Used when a transaction aborts while queued.
    pub(crate) fn scrub_waiter(&mut self, tid: TxnId) {
        for lock in self.locks.values_mut() {
            lock.scrub_waiter(tid);
        }
        self.locks.retain(|_, lock| !lock.is_unused());
    }

    /// Number of locked items.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no item is locked, the quiescent state after every
    /// transaction has terminated.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Iterate over all records.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &Lock)> {
        self.locks.iter()
    }

    /// Snapshot of the table sorted by item, for dumps and tests.
    pub fn snapshot(&self) -> Vec<LockView> {
        let mut views: Vec<LockView> = self
            .locks
            .iter()
            .map(|(item, lock)| LockView {
                item: item.clone(),
                mode: lock.mode,
                holders: lock.holders.to_vec(),
                waiters: lock.wait_queue.iter().map(|w| w.tid).collect(),
            })
            .collect();
        views.sort_by(|a, b| a.item.cmp(&b.item));
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> ItemId {
        ItemId::from(name)
    }

    #[test]
    fn test_fresh_lock_single_holder() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Exclusive);
        let lock = table.get(&item("X")).unwrap();
        assert_eq!(lock.mode(), LockMode::Exclusive);
        assert_eq!(lock.holders(), &[TxnId(1)]);
        assert!(lock.holds(TxnId(1)));
        assert!(lock.is_sole_holder(TxnId(1)));
    }

    #[test]
    fn test_shared_join() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Shared);
        let lock = table.get_mut(&item("X")).unwrap();
        assert!(lock.admissible(TxnId(2), LockMode::Shared));
        lock.grant(TxnId(2), LockMode::Shared);
        assert_eq!(lock.mode(), LockMode::Shared);
        assert_eq!(lock.holders().len(), 2);
        assert!(!lock.is_sole_holder(TxnId(1)));
    }

    #[test]
    fn test_sole_holder_upgrade() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Shared);
        let lock = table.get_mut(&item("X")).unwrap();
        assert!(lock.admissible(TxnId(1), LockMode::Exclusive));
        lock.grant(TxnId(1), LockMode::Exclusive);
        assert_eq!(lock.mode(), LockMode::Exclusive);
        assert_eq!(lock.holders(), &[TxnId(1)]);
    }

    #[test]
    fn test_upgrade_not_admissible_with_other_readers() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Shared);
        let lock = table.get_mut(&item("X")).unwrap();
        lock.grant(TxnId(2), LockMode::Shared);
        assert!(!lock.admissible(TxnId(1), LockMode::Exclusive));
        // Re-reading under the shared lock is still fine.
        assert!(lock.admissible(TxnId(1), LockMode::Shared));
    }

    #[test]
    fn test_exclusive_blocks_everyone_else() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Exclusive);
        let lock = table.get(&item("X")).unwrap();
        assert!(!lock.admissible(TxnId(2), LockMode::Shared));
        assert!(!lock.admissible(TxnId(2), LockMode::Exclusive));
        // The holder itself is covered for both modes.
        assert!(lock.admissible(TxnId(1), LockMode::Shared));
        assert!(lock.admissible(TxnId(1), LockMode::Exclusive));
    }

    #[test]
    fn test_queue_fifo_and_scrub() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Exclusive);
        let lock = table.get_mut(&item("X")).unwrap();
        lock.enqueue(TxnId(2), LockMode::Shared);
        lock.enqueue(TxnId(3), LockMode::Exclusive);
        assert_eq!(
            lock.front_waiter(),
            Some(Waiter {
                tid: TxnId(2),
                mode: LockMode::Shared
            })
        );
        lock.scrub_waiter(TxnId(2));
        assert_eq!(lock.front_waiter().map(|w| w.tid), Some(TxnId(3)));
    }

    #[test]
    fn test_remove_holder_and_cleanup() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Exclusive);
        let lock = table.get_mut(&item("X")).unwrap();
        assert!(lock.remove_holder(TxnId(1)));
        assert!(!lock.remove_holder(TxnId(1)));
        assert!(lock.is_unused());
        table.remove_if_unused(&item("X"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_scrub_waiter_deletes_unused_records() {
        let mut table = LockTable::new();
        table.insert_fresh(item("X"), TxnId(1), LockMode::Exclusive);
        let lock = table.get_mut(&item("X")).unwrap();
        lock.remove_holder(TxnId(1));
        lock.enqueue(TxnId(2), LockMode::Shared);
        table.scrub_waiter(TxnId(2));
        assert!(table.get(&item("X")).is_none());
    }

    #[test]
    fn test_lock_view_serializes() {
        let view = LockView {
            item: item("X"),
            mode: LockMode::Exclusive,
            holders: vec![TxnId(1)],
            waiters: vec![TxnId(2)],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["item"], "X");
        assert_eq!(json["mode"], "exclusive");
        assert_eq!(json["holders"][0], 1);
        assert_eq!(json["waiters"][0], 2);
    }

    #[test]
    fn test_snapshot_sorted_and_displayed() {
        let mut table = LockTable::new();
        table.insert_fresh(item("Y"), TxnId(2), LockMode::Shared);
        table.insert_fresh(item("X"), TxnId(1), LockMode::Exclusive);
        table
            .get_mut(&item("X"))
            .unwrap()
            .enqueue(TxnId(3), LockMode::Shared);

        let snap = table.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].item, item("X"));
        assert_eq!(
            snap[0].to_string(),
            "X: exclusive held by [1], waiting [3]"
        );
        assert_eq!(snap[1].to_string(), "Y: shared held by [2]");
    }
}
