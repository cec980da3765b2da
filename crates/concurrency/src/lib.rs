//! Concurrency layer for lockstep
//!
//! This crate implements strict two-phase locking with Wait-Die deadlock
//! avoidance:
//! - `transaction`: per-transaction records and the transaction table
//! - `lock`: per-item lock records and the lock table
//! - `conflict`: the stateless Wait-Die conflict resolver
//! - `manager`: the `LockManager` orchestrating requests, releases, and
//!   cascading wake-ups
//!
//! All mutation flows through `LockManager`, which owns both tables. The
//! replay is single-threaded by design; the manager is the single
//! mutual-exclusion domain, so a threaded embedding would wrap one manager
//! in one lock rather than locking the tables separately.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conflict;
pub mod lock;
pub mod manager;
pub mod transaction;

pub use conflict::Outcome;
pub use lock::{Lock, LockTable, LockView, Waiter};
pub use manager::LockManager;
pub use transaction::{Transaction, TransactionTable};
