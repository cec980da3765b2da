//! Core vocabulary for the lockstep scheduler
//!
//! This crate defines the types shared by every layer of the system:
//! - Identifiers and lock/transaction enumerations (`types`)
//! - The error taxonomy and `Result` alias (`error`)
//! - The observable trace event model (`event`)
//!
//! Nothing in here mutates state; the lock and transaction tables that act on
//! these types live in `lockstep-concurrency`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod types;

pub use error::{Error, Result};
pub use event::{AbortReason, Event};
pub use types::{ItemId, LockMode, Operation, Statement, Timestamp, TxnId, TxnState};
