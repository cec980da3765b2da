//! Lockstep: deterministic replay of transaction schedules under strict
//! two-phase locking with Wait-Die deadlock avoidance.
//!
//! A schedule is a textual log of begin/read/write/end operations. The
//! replay enforces shared/exclusive locking per item, queues or kills
//! conflicting requests by transaction age, and emits a deterministic trace
//! of grants, waits, aborts, and commits, matching what a database
//! concurrency-control manager would produce for that interleaving.
//!
//! ```
//! use lockstep::Scheduler;
//!
//! let mut scheduler = Scheduler::new();
//! let stats = scheduler.run_script("b1; b2; r1(X); r2(X); e1; e2;").unwrap();
//! assert_eq!(stats.statements, 6);
//! assert!(scheduler.manager().is_quiescent());
//! ```

pub use lockstep_concurrency::{
    Lock, LockManager, LockTable, LockView, Outcome, Transaction, TransactionTable, Waiter,
};
pub use lockstep_core::{
    AbortReason, Error, Event, ItemId, LockMode, Operation, Result, Statement, Timestamp, TxnId,
    TxnState,
};
pub use lockstep_engine::{parse, ReplayStats, Scheduler};
