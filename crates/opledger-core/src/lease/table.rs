//! Lease-table half of a lease.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use rusqlite::{Connection, params};

use crate::error::Result;
use crate::store::Store;

/// Inserts the lease row of an operation.
///
/// # Errors
///
/// Returns a database error, including a constraint violation if the row
/// exists.
pub fn insert_lease(conn: &Connection, store: &Store, operation_id: u64) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (operation_id) VALUES (?1)",
            store.leases_table()
        ),
        params![operation_id as i64],
    )?;
    Ok(())
}

/// Deletes the lease row of an operation. Returns whether a row existed.
///
/// # Errors
///
/// Returns a database error.
pub fn delete_lease(conn: &Connection, store: &Store, operation_id: u64) -> Result<bool> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE operation_id = ?1", store.leases_table()),
        params![operation_id as i64],
    )?;
    Ok(deleted > 0)
}

/// Deletes every lease row whose operation is not `RUNNING`, including rows
/// without any operation record. Returns the number of rows deleted.
///
/// # Errors
///
/// Returns a database error.
pub fn delete_stale_leases(conn: &Connection, store: &Store) -> Result<usize> {
    Ok(conn.execute(
        &format!(
            "DELETE FROM {leases} WHERE operation_id NOT IN (
                SELECT operation_id FROM {ops} WHERE status = 'RUNNING'
            )",
            leases = store.leases_table(),
            ops = store.operations_table()
        ),
        [],
    )?)
}

/// Operation ids holding a lease row, ascending.
///
/// # Errors
///
/// Returns a database error.
pub fn list_leases(conn: &Connection, store: &Store) -> Result<Vec<u64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT operation_id FROM {} ORDER BY operation_id",
        store.leases_table()
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .map(|id| id.map(|id| id as u64))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}
