//! Reclaims operations whose owning process died.
//!
//! Recovery runs as a `REPAIR` operation of its own. Inside its main
//! transaction it selects RUNNING operations older than the grace window and
//! probes their lease locks without blocking. A busy lock means the owner is
//! alive and the operation is left alone; an acquired lock means nobody holds
//! it any more, so the operation is failed on the owner's behalf. Afterwards
//! every lease row whose operation is no longer RUNNING is deleted.
//!
//! Only one recovery per store runs at a time; a second concurrent run fails
//! with `RecoveryInProgress`.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]

use std::time::Duration;

use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::lease::{LeaseGuard, delete_stale_leases};
use crate::ledger::{
    Completed, ERROR_DETAIL_CODE, Message, OperationContext, OperationKind, OperationRunner,
    OperationStatus, SUCCESS_DETAIL_CODE,
};
use crate::session::SessionPair;
use crate::store::{CatalogMetadataProvider, MetadataProvider, Store, StoreRef};

/// Outcome of one recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Id of the `REPAIR` operation.
    pub operation_id: u64,
    /// Operations failed because their owner was gone, ascending.
    pub repaired: Vec<u64>,
    /// Live operations old enough to be candidates whose lease was held.
    pub alive: Vec<u64>,
    /// Lease rows deleted because their operation was no longer RUNNING.
    pub stale_leases_removed: usize,
}

/// Lease recovery of stores.
#[derive(Debug, Clone)]
pub struct LeaseRecovery<P = CatalogMetadataProvider> {
    runner: OperationRunner<P>,
    grace_window: Duration,
}

impl LeaseRecovery {
    /// Recovery reading store descriptors from the catalog.
    #[must_use]
    pub fn new(config: &LedgerConfig) -> Self {
        Self::with_provider(config, CatalogMetadataProvider)
    }
}

impl<P: MetadataProvider> LeaseRecovery<P> {
    /// Recovery using `provider` for store descriptors.
    #[must_use]
    pub fn with_provider(config: &LedgerConfig, provider: P) -> Self {
        Self {
            runner: OperationRunner::with_provider(config, provider),
            grace_window: config.grace_window(),
        }
    }

    /// Minimum age of a RUNNING operation before it is probed.
    #[must_use]
    pub const fn grace_window(&self) -> Duration {
        self.grace_window
    }

    /// Runs recovery of `store` now.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryInProgress` if another recovery of the store is
    /// running, or any error of the `REPAIR` operation.
    pub fn run(&self, sessions: &SessionPair, store: &StoreRef) -> Result<RecoveryReport> {
        self.run_at(sessions, store, crate::now_millis())
    }

    /// Runs recovery as if the current time were `now_ms` (Unix
    /// milliseconds). Only the candidate selection uses `now_ms`.
    ///
    /// # Errors
    ///
    /// See [`LeaseRecovery::run`].
    pub fn run_at(
        &self,
        sessions: &SessionPair,
        store: &StoreRef,
        now_ms: i64,
    ) -> Result<RecoveryReport> {
        let registry = self.runner.ledger().registry();
        let recovery_lock = registry.lock_recovery(store)?;
        let cutoff = now_ms.saturating_sub(self.grace_window.as_millis() as i64);

        let kind = OperationKind::Repair;
        let start = kind.start_message("");
        let Completed {
            operation_id,
            value: scan,
        } = self
            .runner
            .run(sessions, store, kind, &start, |ctx| self.repair(ctx, cutoff))?;

        // lock files of repaired operations go only once FAILED is committed
        for guard in scan.guards {
            guard.release();
        }
        drop(recovery_lock);

        let report = RecoveryReport {
            operation_id,
            repaired: scan.repaired,
            alive: scan.alive,
            stale_leases_removed: scan.stale_leases_removed,
        };
        info!(
            store = %store,
            operation_id,
            repaired = ?report.repaired,
            alive = report.alive.len(),
            stale_leases = report.stale_leases_removed,
            "lease recovery finished"
        );
        Ok(report)
    }

    fn repair(&self, ctx: &mut OperationContext<'_>, cutoff: i64) -> Result<Scan> {
        let conn = ctx.conn();
        let store = ctx.store();
        let ledger = self.runner.ledger();
        let repair_id = ctx.operation_id();

        let mut scan = Scan::default();
        for candidate in running_before(conn, store, cutoff, repair_id)? {
            match ledger.registry().acquire(store.reference(), candidate) {
                Ok(guard) => {
                    scan.repaired.push(candidate);
                    scan.guards.push(guard);
                },
                Err(LedgerError::LeaseBusy { operation_id }) => {
                    debug!(store = %store.reference(), operation_id, "lease held, operation alive");
                    scan.alive.push(operation_id);
                },
                Err(e) => return Err(e),
            }
        }

        if !scan.repaired.is_empty() {
            ctx.set_details(&json!({ "failedOperations": scan.repaired }))?;
        }
        for &orphan in &scan.repaired {
            warn!(store = %store.reference(), operation_id = orphan, "failing abandoned operation");
            ledger.append_messages(
                conn,
                store,
                orphan,
                &[Message::error(
                    ERROR_DETAIL_CODE,
                    format!("Operation abandoned by its owner, failed by repair operation {repair_id}"),
                )],
            )?;
            ledger.update_status(conn, store, orphan, OperationStatus::Failed)?;
        }
        scan.stale_leases_removed = delete_stale_leases(conn, store)?;

        ctx.push_result(Message::success(
            SUCCESS_DETAIL_CODE,
            format!(
                "Repaired running operations: {}",
                serde_json::to_string(&scan.repaired)?
            ),
        ));
        Ok(scan)
    }
}

#[derive(Debug, Default)]
struct Scan {
    repaired: Vec<u64>,
    alive: Vec<u64>,
    guards: Vec<LeaseGuard>,
    stale_leases_removed: usize,
}

/// RUNNING operations started at or before `cutoff`, except `exclude`.
fn running_before(conn: &Connection, store: &Store, cutoff: i64, exclude: u64) -> Result<Vec<u64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT operation_id FROM {}
         WHERE status = ?1 AND started_at <= ?2 AND operation_id <> ?3
         ORDER BY operation_id",
        store.operations_table()
    ))?;
    let ids = stmt
        .query_map(
            params![OperationStatus::Running.as_str(), cutoff, exclude as i64],
            |row| row.get::<_, i64>(0),
        )?
        .map(|id| id.map(|id| id as u64))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}
