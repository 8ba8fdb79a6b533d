//! # opledger-core
//!
//! Operation ledger and consistency bookkeeping for versioned stores.
//!
//! A *store* is a versioned dataset made of an append-only ingestion buffer,
//! an active snapshot and an optional change log. Every administrative
//! mutation of a store (load, activate, roll back, delete, clean up) runs as
//! an *operation* tracked end-to-end by this crate:
//!
//! - [`sequence::IdentitySequencer`] issues strictly increasing, typed ids
//!   from one counter per store.
//! - [`ledger::OperationLedger`] records the `RUNNING -> FINISHED | FAILED`
//!   lifecycle, parameters and progress messages of every operation. The
//!   [`ledger::OperationRunner`] packages the failure semantics: work runs in
//!   a rollback-able main transaction while the fact that the operation
//!   started, and how it failed, is written through a second, durable
//!   connection.
//! - [`affected::AffectedRequestIndex`] stores which requests an operation
//!   touched.
//! - [`recovery::LeaseRecovery`] reclaims operations whose owning process
//!   died, using the file-lock leases of [`lease`].
//! - [`checksum::ConsistencyVerifier`] hashes the active snapshot and change
//!   log and compares them to the hash recorded by the last content-changing
//!   operation.
//! - [`retention`] deletes old terminal ledger records.
//!
//! ## Example
//!
//! ```rust,no_run
//! use opledger_core::config::LedgerConfig;
//! use opledger_core::ledger::{OperationKind, OperationRunner};
//! use opledger_core::session::SessionPair;
//! use opledger_core::store::StoreRef;
//!
//! # fn example() -> Result<(), opledger_core::LedgerError> {
//! let config = LedgerConfig::new("/var/lib/opledger/stores.db");
//! let sessions = SessionPair::open(&config)?;
//! let runner = OperationRunner::new(&config);
//! let store = StoreRef::main("sales")?;
//!
//! let kind = OperationKind::Activate;
//! let start = kind.start_message("[3,4]");
//! let done = runner.run(&sessions, &store, kind, &start, |ctx| {
//!     ctx.record_affected(&[3, 4])?;
//!     ctx.update_checksum(true, false)?;
//!     Ok::<_, opledger_core::LedgerError>(())
//! })?;
//! println!("operation {} finished", done.operation_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod affected;
pub mod checksum;
pub mod config;
pub mod error;
pub mod lease;
pub mod ledger;
pub mod recovery;
pub mod retention;
pub mod sequence;
pub mod session;
pub mod store;

pub use error::{LedgerError, Result, error_chain};

/// Current time as Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
