//! Operation ledger: lifecycle, parameters and messages of every operation.
//!
//! An operation moves `RUNNING -> FINISHED` or `RUNNING -> FAILED`; both
//! terminal states are final. The RUNNING record, its lease and its start
//! message are committed on the durable connection before any work starts,
//! so a rollback of the work never hides that the operation happened.
//!
//! # Example
//!
//! ```rust,no_run
//! use opledger_core::config::LedgerConfig;
//! use opledger_core::ledger::{Message, OperationKind, OperationLedger, Outcome};
//! use opledger_core::session::SessionPair;
//! use opledger_core::store::{CatalogMetadataProvider, MetadataProvider, StoreRef};
//!
//! # fn example() -> Result<(), opledger_core::LedgerError> {
//! let config = LedgerConfig::new("/var/lib/opledger/stores.db");
//! let sessions = SessionPair::open(&config)?;
//! let store = CatalogMetadataProvider.resolve(sessions.durable(), &StoreRef::main("sales")?)?;
//! let ledger = OperationLedger::new(&config);
//!
//! let handle = ledger.open(
//!     sessions.durable(),
//!     &store,
//!     &OperationKind::DeleteRequests,
//!     &Message::info(3001, "Start of Deletion: [12]"),
//! )?;
//! let unit = sessions.begin()?;
//! // ... delete the requests through unit.conn() ...
//! ledger.close(unit, handle, Outcome::Finished, &[OperationKind::DeleteRequests.success_message()])?;
//! # Ok(())
//! # }
//! ```

mod query;
mod runner;
mod storage;
mod types;

#[cfg(test)]
mod tests;

pub(crate) use query::fetch_operation;
pub use query::{MISSING_MESSAGE_TEXT, OperationFilter};
pub use runner::{Completed, OperationContext, OperationRunner};
pub use storage::{OperationHandle, OperationLedger, failure_messages};
pub use types::{
    ERROR_DETAIL_CODE, LogEntry, Message, OperationKind, OperationRecord, OperationStatus, Outcome,
    SUCCESS_DETAIL_CODE, Severity,
};
