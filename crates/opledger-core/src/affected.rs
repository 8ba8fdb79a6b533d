//! Edges between operations and the requests they touched.
//!
//! The index only stores and returns edges. Deciding which requests an
//! operation may select is left to the caller, which typically diffs the
//! requested ids against an eligible set derived from these edges.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::collections::BTreeSet;

use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::ledger::{self, OperationRecord};
use crate::store::Store;

/// An operation together with every request it affected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationHistoryEntry {
    /// The operation.
    pub operation: OperationRecord,
    /// Requests the operation affected.
    pub affected_requests: BTreeSet<u64>,
}

/// Append-only operation-to-request edges of a store.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffectedRequestIndex;

impl AffectedRequestIndex {
    /// Creates an index handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records that `operation_id` affected `request_ids`. Duplicates are
    /// stored as given. Returns the number of edges written.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operation, or a database error.
    pub fn record(
        &self,
        conn: &Connection,
        store: &Store,
        operation_id: u64,
        request_ids: &[u64],
    ) -> Result<usize> {
        if request_ids.is_empty() {
            return Ok(0);
        }
        ledger::fetch_operation(conn, store, operation_id)?;

        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {} (operation_id, request_id) VALUES (?1, ?2)",
            store.affected_table()
        ))?;
        for request_id in request_ids {
            stmt.execute(params![operation_id as i64, *request_id as i64])?;
        }
        debug!(
            store = %store.reference(),
            operation_id,
            count = request_ids.len(),
            "affected requests recorded"
        );
        Ok(request_ids.len())
    }

    /// Requests affected by an operation.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn requests_affected_by(
        &self,
        conn: &Connection,
        store: &Store,
        operation_id: u64,
    ) -> Result<BTreeSet<u64>> {
        collect_ids(
            conn,
            &format!(
                "SELECT request_id FROM {} WHERE operation_id = ?1",
                store.affected_table()
            ),
            operation_id,
        )
    }

    /// Operations that affected a request.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn operations_affecting(
        &self,
        conn: &Connection,
        store: &Store,
        request_id: u64,
    ) -> Result<BTreeSet<u64>> {
        collect_ids(
            conn,
            &format!(
                "SELECT operation_id FROM {} WHERE request_id = ?1",
                store.affected_table()
            ),
            request_id,
        )
    }

    /// Every operation that affected a request, with its full affected set,
    /// most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns a database or serialization error.
    pub fn operation_history_for_request(
        &self,
        conn: &Connection,
        store: &Store,
        request_id: u64,
    ) -> Result<Vec<OperationHistoryEntry>> {
        let mut history = Vec::new();
        for operation_id in self.operations_affecting(conn, store, request_id)? {
            history.push(OperationHistoryEntry {
                operation: ledger::fetch_operation(conn, store, operation_id)?,
                affected_requests: self.requests_affected_by(conn, store, operation_id)?,
            });
        }
        history.sort_by(|a, b| {
            b.operation
                .last_updated_at
                .cmp(&a.operation.last_updated_at)
                .then(b.operation.operation_id.cmp(&a.operation.operation_id))
        });
        Ok(history)
    }
}

fn collect_ids(conn: &Connection, sql: &str, id: u64) -> Result<BTreeSet<u64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![id as i64], |row| row.get::<_, i64>(0))?
        .map(|id| id.map(|id| id as u64))
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(ids)
}
