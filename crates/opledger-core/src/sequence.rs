//! Typed, strictly increasing identifiers from one counter per store.
//!
//! Operations, loads and activations draw from the same counter, so any two
//! ids of a store are comparable regardless of their type. An id is claimed
//! by a single `INSERT ... SELECT max + 1 ... RETURNING` statement executed
//! inside the caller's transaction; if that transaction aborts the id was
//! never recorded. Gaps are allowed, reuse of a committed id is not.

// SQLite stores ids as i64; the counter never goes below 1.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::fmt;
use std::str::FromStr;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::store::Store;

/// Type tag of a sequence entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    /// An operation id.
    Operation,
    /// A load request id.
    Load,
    /// An activation request id.
    Activation,
}

impl RequestType {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Operation => "OPERATION",
            Self::Load => "LOAD",
            Self::Activation => "ACTIVATION",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OPERATION" => Ok(Self::Operation),
            "LOAD" => Ok(Self::Load),
            "ACTIVATION" => Ok(Self::Activation),
            _ => Err(LedgerError::invalid(
                "request_type",
                format!("unknown request type '{s}'"),
            )),
        }
    }
}

/// One issued id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// The id.
    pub id: u64,
    /// Its type tag.
    pub request_type: RequestType,
}

/// Filter for [`IdentitySequencer::list_requests`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    /// Only entries of this type.
    pub request_type: Option<RequestType>,
    /// Lowest id, inclusive.
    pub min_id: Option<u64>,
    /// Highest id, inclusive.
    pub max_id: Option<u64>,
    /// Maximum number of entries returned.
    pub limit: Option<u32>,
}

/// Issues ids from a store's sequence table.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySequencer;

impl IdentitySequencer {
    /// Creates a sequencer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Claims the next id of `store`, tagged with `request_type`.
    ///
    /// Must run inside the transaction of the write that records what the id
    /// is used for. Transactions that may call this are begun `IMMEDIATE` so
    /// concurrent callers serialize on the write lock.
    ///
    /// # Errors
    ///
    /// Returns `SequenceExhausted` when the counter reached `i64::MAX`, or a
    /// database error.
    pub fn next_id(&self, conn: &Connection, store: &Store, request_type: RequestType) -> Result<u64> {
        let table = store.sequence_table();
        let sql = format!(
            "INSERT INTO {table} (id, request_type)
             SELECT max_id + 1, ?1
             FROM (SELECT COALESCE(MAX(id), 0) AS max_id FROM {table})
             WHERE max_id < ?2
             RETURNING id"
        );
        let id: i64 = match conn.query_row(&sql, params![request_type.as_str(), i64::MAX], |row| {
            row.get(0)
        }) {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(LedgerError::SequenceExhausted {
                    store: store.reference().to_string(),
                });
            },
            Err(e) => return Err(e.into()),
        };
        debug!(store = %store.reference(), id, request_type = %request_type, "id issued");
        Ok(id as u64)
    }

    /// Highest id issued so far, 0 if none.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn current_max(&self, conn: &Connection, store: &Store) -> Result<u64> {
        let max: i64 = conn.query_row(
            &format!("SELECT COALESCE(MAX(id), 0) FROM {}", store.sequence_table()),
            [],
            |row| row.get(0),
        )?;
        Ok(max as u64)
    }

    /// Lists issued ids, ascending.
    ///
    /// # Errors
    ///
    /// Returns a database error, or `InvalidArgument` for a row with an
    /// unknown type tag.
    pub fn list_requests(
        &self,
        conn: &Connection,
        store: &Store,
        filter: &RequestFilter,
    ) -> Result<Vec<RequestInfo>> {
        let sql = format!(
            "SELECT id, request_type FROM {}
             WHERE (?1 IS NULL OR request_type = ?1)
               AND (?2 IS NULL OR id >= ?2)
               AND (?3 IS NULL OR id <= ?3)
             ORDER BY id
             LIMIT ?4",
            store.sequence_table()
        );
        let limit = filter.limit.map_or(-1, i64::from);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.request_type.map(RequestType::as_str),
                filter.min_id.map(|id| id as i64),
                filter.max_id.map(|id| id as i64),
                limit
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut requests = Vec::new();
        for row in rows {
            let (id, request_type) = row?;
            requests.push(RequestInfo {
                id: id as u64,
                request_type: request_type.parse()?,
            });
        }
        Ok(requests)
    }
}
