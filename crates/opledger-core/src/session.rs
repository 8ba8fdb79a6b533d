//! The main/durable connection pair of a caller.
//!
//! Every caller holds two connections to the same database:
//!
//! - **main** carries the unit of work being ledgered and is rolled back when
//!   the work fails;
//! - **durable** carries ledger status and messages only, and each of its
//!   writes commits immediately.
//!
//! `SQLite` admits a single writer at a time, so the durable connection
//! writes only while no main transaction is open: when an operation is opened
//! and after the main transaction has been rolled back.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::config::LedgerConfig;
use crate::error::Result;
use crate::store::quote_ident;

/// Pragmas applied to every connection.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;";

/// Two connections to one database.
#[derive(Debug)]
pub struct SessionPair {
    main: Connection,
    durable: Connection,
}

impl SessionPair {
    /// Opens both connections to the configured database.
    ///
    /// # Errors
    ///
    /// Returns a database error if either connection cannot be opened or
    /// configured.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let main = open_connection(&config.database_path, config.busy_timeout())?;
        let durable = open_connection(&config.database_path, config.busy_timeout())?;
        debug!(path = %config.database_path.display(), "session pair opened");
        Ok(Self { main, durable })
    }

    /// Attaches another database file as `schema` on both connections.
    ///
    /// # Errors
    ///
    /// Returns a database error if the attach fails.
    pub fn attach(&self, schema: &str, path: &Path) -> Result<()> {
        let sql = format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema));
        let path = path.to_string_lossy();
        self.main.execute(&sql, [path.as_ref()])?;
        self.durable.execute(&sql, [path.as_ref()])?;
        Ok(())
    }

    /// The transactional connection.
    #[must_use]
    pub const fn main(&self) -> &Connection {
        &self.main
    }

    /// The immediate-commit ledger connection.
    #[must_use]
    pub const fn durable(&self) -> &Connection {
        &self.durable
    }

    /// Begins a unit of work on the main connection.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write lock cannot be taken within the
    /// busy timeout.
    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        Ok(UnitOfWork {
            tx: begin_immediate(&self.main)?,
            durable: &self.durable,
        })
    }
}

/// An open main transaction together with the durable connection.
///
/// Dropping a unit of work without committing rolls it back.
#[derive(Debug)]
pub struct UnitOfWork<'a> {
    tx: Transaction<'a>,
    durable: &'a Connection,
}

impl<'a> UnitOfWork<'a> {
    /// The connection executing the main transaction.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    /// The durable connection.
    #[must_use]
    pub const fn durable(&self) -> &'a Connection {
        self.durable
    }

    /// Commits the main transaction.
    ///
    /// # Errors
    ///
    /// Returns a database error if the commit fails.
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Rolls the main transaction back and hands out the durable connection.
    ///
    /// # Errors
    ///
    /// Returns a database error if the rollback fails.
    pub fn rollback(self) -> Result<&'a Connection> {
        self.tx.rollback()?;
        Ok(self.durable)
    }
}

/// Begins an `IMMEDIATE` transaction, taking the database write lock up
/// front.
///
/// # Errors
///
/// Returns a database error if the lock cannot be taken within the busy
/// timeout.
pub fn begin_immediate(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(conn)
}
