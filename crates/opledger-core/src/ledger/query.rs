//! Read access to operation records and their messages.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::storage::OperationLedger;
use super::types::{LogEntry, Message, OperationRecord, OperationStatus, Severity};
use crate::error::{LedgerError, Result};
use crate::store::Store;

/// Text shown for a message stored without text.
pub const MISSING_MESSAGE_TEXT: &str = "<Missing message text>";

/// Filter for [`OperationLedger::list_operations`]. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    /// Stored kind, e.g. `ACTIVATE`.
    pub kind: Option<String>,
    /// Lifecycle status.
    pub status: Option<OperationStatus>,
    /// Owner.
    pub owner: Option<String>,
    /// Lowest operation id, inclusive.
    pub min_id: Option<u64>,
    /// Highest operation id, inclusive.
    pub max_id: Option<u64>,
    /// Earliest `last_updated_at`, inclusive, in Unix milliseconds.
    pub updated_from: Option<i64>,
    /// Latest `last_updated_at`, inclusive, in Unix milliseconds.
    pub updated_to: Option<i64>,
    /// Maximum number of records.
    pub limit: Option<u32>,
}

const OPERATION_COLUMNS: &str = "operation_id, kind, status, owner, started_at, last_updated_at, \
                                 details, checksum_active, checksum_changelog";

impl OperationLedger {
    /// Fetches one operation record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operation, or a database error.
    pub fn operation(&self, conn: &Connection, store: &Store, operation_id: u64) -> Result<OperationRecord> {
        fetch_operation(conn, store, operation_id)
    }

    /// Lists operation records, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns a database or serialization error.
    pub fn list_operations(
        &self,
        conn: &Connection,
        store: &Store,
        filter: &OperationFilter,
    ) -> Result<Vec<OperationRecord>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM {}
             WHERE (?1 IS NULL OR kind = ?1)
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR owner = ?3)
               AND (?4 IS NULL OR operation_id >= ?4)
               AND (?5 IS NULL OR operation_id <= ?5)
               AND (?6 IS NULL OR last_updated_at >= ?6)
               AND (?7 IS NULL OR last_updated_at <= ?7)
             ORDER BY last_updated_at DESC, operation_id DESC
             LIMIT ?8",
            store.operations_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.kind,
                filter.status.map(OperationStatus::as_str),
                filter.owner,
                filter.min_id.map(|id| id as i64),
                filter.max_id.map(|id| id as i64),
                filter.updated_from,
                filter.updated_to,
                filter.limit.map_or(-1, i64::from)
            ],
            RawOperation::from_row,
        )?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }

    /// Messages of an operation, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns a database error, or `InvalidArgument` for a stored severity
    /// code that is not recognized.
    pub fn messages(&self, conn: &Connection, store: &Store, operation_id: u64) -> Result<Vec<LogEntry>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT seq_no, logged_at, severity, code, text FROM {}
             WHERE operation_id = ?1 ORDER BY seq_no",
            store.messages_table()
        ))?;
        let rows = stmt.query_map(params![operation_id as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (seq_no, logged_at, severity, code, text) = row?;
            entries.push(LogEntry {
                operation_id,
                seq_no: seq_no as u64,
                logged_at,
                message: Message::new(
                    Severity::from_code(&severity)?,
                    code,
                    text.unwrap_or_else(|| MISSING_MESSAGE_TEXT.to_string()),
                ),
            });
        }
        Ok(entries)
    }

    /// Current status of an operation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operation, or a database error.
    pub fn status(&self, conn: &Connection, store: &Store, operation_id: u64) -> Result<OperationStatus> {
        super::storage::read_status(conn, store, operation_id)
    }
}

pub(crate) fn fetch_operation(conn: &Connection, store: &Store, operation_id: u64) -> Result<OperationRecord> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {OPERATION_COLUMNS} FROM {} WHERE operation_id = ?1",
                store.operations_table()
            ),
            params![operation_id as i64],
            RawOperation::from_row,
        )
        .optional()?;
    raw.ok_or_else(|| LedgerError::operation_not_found(operation_id))?
        .into_record()
}

struct RawOperation {
    operation_id: i64,
    kind: String,
    status: String,
    owner: String,
    started_at: i64,
    last_updated_at: i64,
    details: String,
    checksum_active: String,
    checksum_changelog: String,
}

impl RawOperation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            operation_id: row.get(0)?,
            kind: row.get(1)?,
            status: row.get(2)?,
            owner: row.get(3)?,
            started_at: row.get(4)?,
            last_updated_at: row.get(5)?,
            details: row.get(6)?,
            checksum_active: row.get(7)?,
            checksum_changelog: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<OperationRecord> {
        let details = if self.details.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&self.details)?
        };
        Ok(OperationRecord {
            operation_id: self.operation_id as u64,
            kind: self.kind,
            status: self.status.parse()?,
            owner: self.owner,
            started_at: self.started_at,
            last_updated_at: self.last_updated_at,
            details,
            checksum_active: self.checksum_active,
            checksum_changelog: self.checksum_changelog,
        })
    }
}
