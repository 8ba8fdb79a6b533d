//! Retention cleanup of terminal ledger records.
//!
//! Cleanup runs as a `CLEANUP_METADATA` operation. It deletes FINISHED and
//! FAILED operation records that are both old enough and at or below an id
//! bound, together with their messages, affected-request edges, leftover
//! lease rows and sequence entries. The sequence entry holding the current
//! maximum id is never deleted, so the counter cannot move backwards.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::{LedgerConfig, RetentionConfig};
use crate::error::Result;
use crate::ledger::{
    Completed, Message, OperationContext, OperationKind, OperationRunner, SUCCESS_DETAIL_CODE,
};
use crate::session::SessionPair;
use crate::store::{CatalogMetadataProvider, MetadataProvider, Store, StoreRef};

/// Which terminal operations are eligible for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Highest operation id that may be deleted; `None` for no bound.
    pub max_operation_id: Option<u64>,
    /// Only operations last updated at or before this instant are deleted.
    pub older_than: DateTime<Utc>,
}

impl RetentionPolicy {
    /// Policy deleting operations older than the configured maximum age.
    #[must_use]
    pub fn from_config(config: &RetentionConfig, now: DateTime<Utc>) -> Self {
        Self {
            max_operation_id: None,
            older_than: now - Duration::days(i64::from(config.max_age_days)),
        }
    }
}

/// Counts of deleted rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Id of the `CLEANUP_METADATA` operation.
    pub operation_id: u64,
    /// Deleted operation records.
    pub operations: usize,
    /// Deleted messages.
    pub messages: usize,
    /// Deleted affected-request edges.
    pub affected_requests: usize,
    /// Deleted sequence entries.
    pub sequence_entries: usize,
}

/// Retention cleanup of stores.
#[derive(Debug, Clone)]
pub struct Retention<P = CatalogMetadataProvider> {
    runner: OperationRunner<P>,
}

impl Retention {
    /// Retention reading store descriptors from the catalog.
    #[must_use]
    pub fn new(config: &LedgerConfig) -> Self {
        Self::with_provider(config, CatalogMetadataProvider)
    }
}

impl<P: MetadataProvider> Retention<P> {
    /// Retention using `provider` for store descriptors.
    #[must_use]
    pub fn with_provider(config: &LedgerConfig, provider: P) -> Self {
        Self {
            runner: OperationRunner::with_provider(config, provider),
        }
    }

    /// Deletes the terminal operations selected by `policy`.
    ///
    /// # Errors
    ///
    /// Returns any error of the `CLEANUP_METADATA` operation, which is then
    /// recorded as FAILED.
    pub fn cleanup(
        &self,
        sessions: &SessionPair,
        store: &StoreRef,
        policy: &RetentionPolicy,
    ) -> Result<CleanupReport> {
        let kind = OperationKind::CleanupMetadata;
        let start = kind.start_message(&format!(
            "operations up to {} last updated before {}",
            policy
                .max_operation_id
                .map_or_else(|| "any id".to_string(), |id| id.to_string()),
            policy.older_than.to_rfc3339()
        ));
        let Completed {
            operation_id,
            value: mut report,
        } = self
            .runner
            .run(sessions, store, kind, &start, |ctx| delete_terminal(ctx, policy))?;
        report.operation_id = operation_id;

        info!(
            store = %store,
            operation_id,
            operations = report.operations,
            messages = report.messages,
            "ledger cleanup finished"
        );
        Ok(report)
    }
}

fn delete_terminal(ctx: &mut OperationContext<'_>, policy: &RetentionPolicy) -> Result<CleanupReport> {
    let conn = ctx.conn();
    let store = ctx.store();
    ctx.set_details(&json!({
        "maxOperationId": policy.max_operation_id,
        "olderThan": policy.older_than.to_rfc3339(),
    }))?;

    let victims = eligible(conn, store, policy, ctx.operation_id())?;
    let mut report = CleanupReport::default();
    let delete_by_operation = |table: String| -> Result<usize> {
        let mut stmt = conn.prepare(&format!("DELETE FROM {table} WHERE operation_id = ?1"))?;
        let mut total = 0;
        for id in &victims {
            total += stmt.execute(params![*id as i64])?;
        }
        Ok(total)
    };

    report.affected_requests = delete_by_operation(store.affected_table())?;
    report.messages = delete_by_operation(store.messages_table())?;
    delete_by_operation(store.leases_table())?;
    report.operations = delete_by_operation(store.operations_table())?;

    let sequence = store.sequence_table();
    let mut stmt = conn.prepare(&format!(
        "DELETE FROM {sequence} WHERE id = ?1 AND id < (SELECT MAX(id) FROM {sequence})"
    ))?;
    for id in &victims {
        report.sequence_entries += stmt.execute(params![*id as i64])?;
    }

    ctx.push_result(Message::success(
        SUCCESS_DETAIL_CODE,
        format!("Deleted {} operation records", report.operations),
    ));
    Ok(report)
}

fn eligible(conn: &Connection, store: &Store, policy: &RetentionPolicy, exclude: u64) -> Result<Vec<u64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT operation_id FROM {}
         WHERE status IN ('FINISHED', 'FAILED')
           AND (?1 IS NULL OR operation_id <= ?1)
           AND last_updated_at <= ?2
           AND operation_id <> ?3
         ORDER BY operation_id",
        store.operations_table()
    ))?;
    let ids = stmt
        .query_map(
            params![
                policy.max_operation_id.map(|id| id as i64),
                policy.older_than.timestamp_millis(),
                exclude as i64
            ],
            |row| row.get::<_, i64>(0),
        )?
        .map(|id| id.map(|id| id as u64))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}
