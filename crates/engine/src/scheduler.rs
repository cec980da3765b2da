//! The scheduler driver
//!
//! Consumes the ordered statement stream and dispatches each statement to
//! the lock manager, maintaining the monotonic logical clock that doubles as
//! transaction priority. The driver is the only place the per-transaction
//! state machine of the schedule surface lives:
//!
//! - terminal transaction → the statement is discarded silently (it belongs
//!   to a transaction that already left the system),
//! - waiting transaction → the statement is buffered for replay,
//! - active transaction → begin is a no-op, read/write go to the conflict
//!   resolver, end commits.
//!
//! The replay loop distinguishes error severities: unknown ids and malformed
//! statements are logged and skipped, while an illegal state transition
//! aborts the run, since downstream state can no longer be trusted.

use crate::parse;
use lockstep_concurrency::LockManager;
use lockstep_core::event::Event;
use lockstep_core::types::{LockMode, Statement, Timestamp, TxnId, TxnState};
use lockstep_core::{Error, Result};
use serde::Serialize;
use tracing::{debug, warn};

const TRACE_TARGET: &str = "lockstep::sched";

/// Counters describing one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Statements consumed by the scheduler (the logical clock's final value).
    pub statements: u64,
    /// Statements that failed to parse and were skipped.
    pub malformed: u64,
    /// Statements skipped because their id was never begun.
    pub unknown: u64,
    /// Statements discarded because their transaction had already terminated.
    pub discarded: u64,
}

/// Replays a schedule against a lock manager.
#[derive(Debug, Default)]
pub struct Scheduler {
    manager: LockManager,
    clock: Timestamp,
    stats: ReplayStats,
}

impl Scheduler {
    /// Create a scheduler with empty tables and a zeroed clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock manager driven by this scheduler.
    pub fn manager(&self) -> &LockManager {
        &self.manager
    }

    /// Current value of the logical clock.
    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    /// Counters for the statements consumed so far.
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// The trace accumulated so far.
    pub fn trace(&self) -> &[Event] {
        self.manager.trace()
    }

    /// Consume the scheduler, returning the full trace.
    pub fn into_trace(mut self) -> Vec<Event> {
        self.manager.drain_trace()
    }

    /// Apply one statement.
    ///
    /// Ticks the clock, then dispatches on the transaction's state. Errors
    /// follow the taxonomy: `UnknownTransaction` and `MalformedOperation`
    /// leave the tables untouched and may be skipped by the caller;
    /// `IllegalTransition` must end the run.
    pub fn apply(&mut self, stmt: &Statement) -> Result<()> {
        use lockstep_core::types::Operation::*;

        self.clock += 1;
        self.stats.statements += 1;

        let Statement { tid, op } = stmt;
        if matches!(op, Begin) {
            // A fresh id registers with the current clock as its priority;
            // a repeated Begin for a live id is a no-op inside the manager.
            return self.manager.begin(*tid, self.clock).map(drop);
        }

        let txn = self.manager.transactions().get(*tid)?;
        let state = txn.state();

        if state.is_terminal() {
            // Log entries for an already-resolved transaction.
            debug!(target: TRACE_TARGET, %tid, ?op, "discarding operation for terminated transaction");
            self.stats.discarded += 1;
            return Ok(());
        }
        if state == TxnState::Waiting {
            return self.manager.buffer(*tid, op.clone());
        }

        match op {
            Begin => Ok(()), // handled above
            Read(item) => self.manager.request(*tid, item, LockMode::Shared).map(drop),
            Write(item) => self
                .manager
                .request(*tid, item, LockMode::Exclusive)
                .map(drop),
            End => self.manager.commit(*tid),
        }
    }

    /// Replay a whole schedule, skipping recoverable errors.
    ///
    /// Malformed statements and operations for unknown ids are logged with a
    /// warning and counted; an `IllegalTransition` is returned immediately.
    /// Returns the final statement counters on success.
    pub fn run_script(&mut self, input: &str) -> Result<ReplayStats> {
        for parsed in parse::statements(input) {
            let stmt = match parsed {
                Ok(stmt) => stmt,
                Err(err) => {
                    warn!(target: TRACE_TARGET, error = %err, "skipping malformed statement");
                    self.stats.malformed += 1;
                    continue;
                }
            };
            match self.apply(&stmt) {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    if matches!(err, Error::UnknownTransaction(_)) {
                        self.stats.unknown += 1;
                    } else {
                        self.stats.malformed += 1;
                    }
                    warn!(target: TRACE_TARGET, error = %err, "skipping statement");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.stats)
    }

    /// Ids of transactions that are still not terminal, in no particular
    /// order. Empty at quiescence.
    pub fn live_transactions(&self) -> Vec<TxnId> {
        self.manager
            .transactions()
            .iter()
            .filter(|t| !t.state().is_terminal())
            .map(|t| t.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::event::AbortReason;
    use lockstep_core::types::{ItemId, LockMode, Operation, TxnState};

    fn stmt(tid: u64, op: Operation) -> Statement {
        Statement::new(TxnId(tid), op)
    }

    #[test]
    fn test_clock_ticks_and_stamps_begin() {
        let mut sched = Scheduler::new();
        sched.apply(&stmt(1, Operation::Begin)).unwrap();
        sched.apply(&stmt(2, Operation::Begin)).unwrap();
        assert_eq!(sched.clock(), 2);
        let txns = sched.manager().transactions();
        assert_eq!(txns.get(TxnId(1)).unwrap().timestamp(), 1);
        assert_eq!(txns.get(TxnId(2)).unwrap().timestamp(), 2);
    }

    #[test]
    fn test_unknown_transaction_rejected() {
        let mut sched = Scheduler::new();
        let err = sched
            .apply(&stmt(1, Operation::Read(ItemId::from("X"))))
            .unwrap_err();
        assert_eq!(err, lockstep_core::Error::UnknownTransaction(TxnId(1)));
        // The clock still ticked for the processed line.
        assert_eq!(sched.clock(), 1);
    }

    #[test]
    fn test_terminal_operations_discarded() {
        let mut sched = Scheduler::new();
        sched.run_script("b1; w1(X); e1;").unwrap();
        // Operations for the committed transaction are ignored.
        sched.apply(&stmt(1, Operation::Read(ItemId::from("X")))).unwrap();
        sched.apply(&stmt(1, Operation::End)).unwrap();
        assert_eq!(sched.stats().discarded, 2);
        assert_eq!(sched.trace().len(), 3); // begun, granted, committed
    }

    #[test]
    fn test_waiting_operations_buffered() {
        let mut sched = Scheduler::new();
        sched.run_script("b1; b2; w2(X); w1(X);").unwrap();
        assert_eq!(
            sched
                .manager()
                .transactions()
                .get(TxnId(1))
                .unwrap()
                .state(),
            TxnState::Waiting
        );
        sched.apply(&stmt(1, Operation::Read(ItemId::from("Y")))).unwrap();
        assert_eq!(
            sched
                .manager()
                .transactions()
                .get(TxnId(1))
                .unwrap()
                .pending_len(),
            1
        );
        // Nothing was granted for the buffered read.
        assert!(sched.manager().locks().get(&ItemId::from("Y")).is_none());
    }

    #[test]
    fn test_run_script_skips_recoverable_errors() {
        let mut sched = Scheduler::new();
        let stats = sched
            .run_script("x9; b1; r2(X); r1(X); e1;")
            .unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown, 1);
        // The valid statements still ran to completion.
        assert!(sched.manager().is_quiescent());
        assert!(sched
            .trace()
            .iter()
            .any(|e| matches!(e, Event::Committed { tid: TxnId(1) })));
    }

    #[test]
    fn test_begin_after_termination_is_malformed_not_restart() {
        let mut sched = Scheduler::new();
        let stats = sched.run_script("b1; e1; b1; ").unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(
            sched
                .manager()
                .transactions()
                .get(TxnId(1))
                .unwrap()
                .state(),
            TxnState::Committed
        );
    }

    #[test]
    fn test_wait_die_death_is_an_event_not_an_error() {
        let mut sched = Scheduler::new();
        let stats = sched.run_script("b1; b2; w1(X); w2(X); e1; e2;").unwrap();
        assert_eq!(stats.unknown, 0);
        assert_eq!(stats.malformed, 0);
        // The younger writer died; its end was then discarded.
        assert_eq!(stats.discarded, 1);
        assert!(sched.trace().iter().any(|e| matches!(
            e,
            Event::Aborted {
                tid: TxnId(2),
                reason: AbortReason::Died {
                    killed_by: TxnId(1),
                    ..
                },
            }
        )));
        assert!(sched.manager().is_quiescent());
    }

    #[test]
    fn test_live_transactions() {
        let mut sched = Scheduler::new();
        sched.run_script("b1; b2; w2(X); w1(X); ").unwrap();
        let mut live = sched.live_transactions();
        live.sort();
        assert_eq!(live, [TxnId(1), TxnId(2)]);
        sched.run_script("e2; e1;").unwrap();
        assert!(sched.live_transactions().is_empty());
    }

    #[test]
    fn test_read_then_write_upgrades() {
        let mut sched = Scheduler::new();
        sched.run_script("b1; r1(X); w1(X);").unwrap();
        let lock = sched.manager().locks().get(&ItemId::from("X")).unwrap();
        assert_eq!(lock.mode(), LockMode::Exclusive);
        assert_eq!(lock.holders(), &[TxnId(1)]);
    }
}
