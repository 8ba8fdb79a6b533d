//! Leases of running operations.
//!
//! A lease has two halves:
//!
//! - a row in the store's lease table, inserted by the commit that opens the
//!   operation and deleted by the commit that makes it terminal;
//! - an exclusive advisory lock on `<lease_dir>/<schema>/<store>/<id>.lease`,
//!   held by the owning process for the life of the operation.
//!
//! The operating system drops the file lock when its process dies. A
//! non-blocking probe of the lock therefore tells a live operation (lock
//! busy) from an orphan (lock acquired).

mod registry;
mod table;

pub use registry::{LeaseGuard, LeaseRegistry, ProbeOutcome};
pub use table::{delete_lease, delete_stale_leases, insert_lease, list_leases};
