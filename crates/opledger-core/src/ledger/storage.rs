//! Operation records, messages and the status state machine.

// SQLite stores ids and sequence numbers as i64; both are never negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{error, info, warn};

use super::types::{ERROR_DETAIL_CODE, Message, OperationKind, OperationStatus, Outcome, Severity};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result, error_chain};
use crate::lease::{self, LeaseGuard, LeaseRegistry};
use crate::sequence::{IdentitySequencer, RequestType};
use crate::session::{UnitOfWork, begin_immediate};
use crate::store::Store;

/// Records operation lifecycles of stores.
#[derive(Debug, Clone)]
pub struct OperationLedger {
    registry: LeaseRegistry,
    sequencer: IdentitySequencer,
    owner: String,
}

/// A RUNNING operation opened by this process.
///
/// The handle holds the operation's lease lock. Dropping it without
/// [`OperationLedger::close`] releases the lock and leaves the operation to
/// lease recovery, exactly as a crash of the process would.
#[derive(Debug)]
pub struct OperationHandle {
    operation_id: u64,
    kind: OperationKind,
    store: Store,
    lease: LeaseGuard,
}

impl OperationHandle {
    /// The operation id.
    #[must_use]
    pub const fn operation_id(&self) -> u64 {
        self.operation_id
    }

    /// The operation kind.
    #[must_use]
    pub const fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// The store the operation runs against.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Releases the lease lock and deletes its file.
    pub(crate) fn release(self) {
        self.lease.release();
    }
}

impl OperationLedger {
    /// Ledger using the configured lease directory and owner.
    #[must_use]
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            registry: LeaseRegistry::from_config(config),
            sequencer: IdentitySequencer::new(),
            owner: config.owner.clone(),
        }
    }

    /// The lease registry.
    #[must_use]
    pub const fn registry(&self) -> &LeaseRegistry {
        &self.registry
    }

    /// Owner recorded on opened operations.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Opens an operation on the durable connection.
    ///
    /// Claims an operation id, inserts the RUNNING record, the lease row and
    /// `start` in one immediate transaction, and takes the lease lock before
    /// committing. Nothing is written if any step fails.
    ///
    /// # Errors
    ///
    /// Returns `SequenceExhausted`, `LeaseBusy`, an I/O error on the lease
    /// file, or a database error.
    pub fn open(
        &self,
        durable: &Connection,
        store: &Store,
        kind: &OperationKind,
        start: &Message,
    ) -> Result<OperationHandle> {
        let tx = begin_immediate(durable)?;
        let operation_id = self.sequencer.next_id(&tx, store, RequestType::Operation)?;
        let now = crate::now_millis();
        tx.execute(
            &format!(
                "INSERT INTO {} (operation_id, kind, status, owner, started_at, last_updated_at)
                 VALUES (?1, ?2, 'RUNNING', ?3, ?4, ?4)",
                store.operations_table()
            ),
            params![operation_id as i64, kind.as_str(), self.owner, now],
        )?;
        lease::insert_lease(&tx, store, operation_id)?;
        insert_messages(&tx, store, operation_id, std::slice::from_ref(start))?;

        let lease = self.registry.acquire(store.reference(), operation_id)?;
        if let Err(e) = tx.commit() {
            lease.release();
            return Err(e.into());
        }

        info!(
            store = %store.reference(),
            operation_id,
            kind = %kind,
            owner = %self.owner,
            "operation opened"
        );
        Ok(OperationHandle {
            operation_id,
            kind: kind.clone(),
            store: store.clone(),
            lease,
        })
    }

    /// Overwrites the details of an operation and bumps `last_updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operation, or a database error.
    pub fn set_details(
        &self,
        conn: &Connection,
        store: &Store,
        operation_id: u64,
        details: &serde_json::Value,
    ) -> Result<()> {
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET details = ?1, last_updated_at = ?2 WHERE operation_id = ?3",
                store.operations_table()
            ),
            params![
                serde_json::to_string(details)?,
                crate::now_millis(),
                operation_id as i64
            ],
        )?;
        if updated == 0 {
            return Err(LedgerError::operation_not_found(operation_id));
        }
        Ok(())
    }

    /// Appends messages with dense sequence numbers after the existing ones.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMessageList` if `messages` is empty, `NotFound` for an
    /// unknown operation, or a database error.
    pub fn append_messages(
        &self,
        conn: &Connection,
        store: &Store,
        operation_id: u64,
        messages: &[Message],
    ) -> Result<()> {
        if messages.is_empty() {
            return Err(LedgerError::EmptyMessageList { operation_id });
        }
        read_status(conn, store, operation_id)?;
        insert_messages(conn, store, operation_id, messages)
    }

    /// Moves a RUNNING operation to a terminal status.
    ///
    /// The update is fenced on the current status: a concurrent change that
    /// lands first makes this call fail instead of overwriting it. Moving to
    /// `FINISHED` also deletes the lease row; callers moving to `FAILED`
    /// delete it themselves.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operation, `InvalidTransition` if
    /// the operation is not RUNNING or `status` is not terminal, or a
    /// database error.
    pub fn update_status(
        &self,
        conn: &Connection,
        store: &Store,
        operation_id: u64,
        status: OperationStatus,
    ) -> Result<()> {
        let current = read_status(conn, store, operation_id)?;
        if !current.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                operation_id,
                from: current,
                to: status,
            });
        }

        let updated = conn.execute(
            &format!(
                "UPDATE {} SET status = ?1, last_updated_at = ?2
                 WHERE operation_id = ?3 AND status = 'RUNNING'",
                store.operations_table()
            ),
            params![status.as_str(), crate::now_millis(), operation_id as i64],
        )?;
        if updated == 0 {
            return Err(LedgerError::InvalidTransition {
                operation_id,
                from: read_status(conn, store, operation_id)?,
                to: status,
            });
        }
        if status == OperationStatus::Finished {
            lease::delete_lease(conn, store, operation_id)?;
        }
        info!(store = %store.reference(), operation_id, status = %status, "operation status updated");
        Ok(())
    }

    /// Closes an operation.
    ///
    /// `Outcome::Finished` appends `messages`, marks the operation FINISHED
    /// and commits `unit`. If any of that fails, the failure is recorded as
    /// for `Outcome::Failed` and the error returned.
    ///
    /// `Outcome::Failed` rolls `unit` back, then durably appends `messages`,
    /// marks the operation FAILED and deletes its lease row. Ledger-write
    /// failures on this path are logged, never returned.
    ///
    /// # Errors
    ///
    /// Only for `Outcome::Finished`: `InvalidTransition` if the operation is
    /// no longer RUNNING (for instance, lease recovery failed it), or a
    /// database error.
    pub fn close(
        &self,
        unit: UnitOfWork<'_>,
        handle: OperationHandle,
        outcome: Outcome,
        messages: &[Message],
    ) -> Result<()> {
        let durable = unit.durable();
        match outcome {
            Outcome::Finished => {
                let finished = self.finish(&unit, &handle, messages);
                match finished.and_then(|()| unit.commit()) {
                    Ok(()) => {
                        info!(
                            store = %handle.store.reference(),
                            operation_id = handle.operation_id,
                            kind = %handle.kind,
                            "operation finished"
                        );
                        handle.lease.release();
                        Ok(())
                    },
                    Err(e) => {
                        // the unit has been dropped, so the write lock is free
                        self.record_failure(durable, &handle, &failure_messages(&handle.kind, &e));
                        handle.lease.release();
                        Err(e)
                    },
                }
            },
            Outcome::Failed => {
                if let Err(e) = unit.rollback() {
                    warn!(
                        operation_id = handle.operation_id,
                        error = %e,
                        "rollback of main transaction failed"
                    );
                }
                self.record_failure(durable, &handle, messages);
                handle.lease.release();
                Ok(())
            },
        }
    }

    fn finish(&self, unit: &UnitOfWork<'_>, handle: &OperationHandle, messages: &[Message]) -> Result<()> {
        if !messages.is_empty() {
            self.append_messages(unit.conn(), &handle.store, handle.operation_id, messages)?;
        }
        self.update_status(
            unit.conn(),
            &handle.store,
            handle.operation_id,
            OperationStatus::Finished,
        )
    }

    /// Durably records the failure of an operation: appends `messages`,
    /// marks it FAILED and deletes its lease row.
    ///
    /// Must not be called while a main transaction of the same database is
    /// open. Each step commits on its own; a failing step is logged and the
    /// remaining steps still run.
    pub fn record_failure(&self, durable: &Connection, handle: &OperationHandle, messages: &[Message]) {
        let store = &handle.store;
        let operation_id = handle.operation_id;

        if !messages.is_empty() {
            let appended = begin_immediate(durable).and_then(|tx| {
                self.append_messages(&tx, store, operation_id, messages)?;
                tx.commit()?;
                Ok(())
            });
            if let Err(e) = appended {
                warn!(operation_id, error = %e, "failed to record failure messages");
            }
        }

        let failed = begin_immediate(durable).and_then(|tx| {
            if let Err(e) = self.update_status(&tx, store, operation_id, OperationStatus::Failed) {
                warn!(operation_id, error = %e, "failed to mark operation FAILED");
            }
            lease::delete_lease(&tx, store, operation_id)?;
            tx.commit()?;
            Ok(())
        });
        if let Err(e) = failed {
            warn!(operation_id, error = %e, "failed to release lease of failed operation");
        }
    }
}

/// ERROR messages describing `err`: one per line of its source chain, then
/// the fixed failure message of `kind`.
#[must_use]
pub fn failure_messages(kind: &OperationKind, err: &(dyn std::error::Error + 'static)) -> Vec<Message> {
    let mut messages: Vec<Message> = error_chain(err)
        .into_iter()
        .map(|line| Message::error(ERROR_DETAIL_CODE, line))
        .collect();
    messages.push(kind.failure_message());
    messages
}

pub(super) fn read_status(conn: &Connection, store: &Store, operation_id: u64) -> Result<OperationStatus> {
    let status: Option<String> = conn
        .query_row(
            &format!(
                "SELECT status FROM {} WHERE operation_id = ?1",
                store.operations_table()
            ),
            params![operation_id as i64],
            |row| row.get(0),
        )
        .optional()?;
    status
        .ok_or_else(|| LedgerError::operation_not_found(operation_id))?
        .parse()
}

fn insert_messages(conn: &Connection, store: &Store, operation_id: u64, messages: &[Message]) -> Result<()> {
    let table = store.messages_table();
    let next: i64 = conn.query_row(
        &format!("SELECT COALESCE(MAX(seq_no) + 1, 0) FROM {table} WHERE operation_id = ?1"),
        params![operation_id as i64],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {table} (operation_id, seq_no, logged_at, severity, code, text)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    ))?;
    let now = crate::now_millis();
    for (seq_no, message) in (next..).zip(messages) {
        stmt.execute(params![
            operation_id as i64,
            seq_no,
            now,
            message.severity.code(),
            message.code,
            message.text
        ])?;
        trace_message(store, operation_id, message);
    }
    Ok(())
}

fn trace_message(store: &Store, operation_id: u64, message: &Message) {
    match message.severity {
        Severity::Error => error!(
            store = %store.reference(),
            operation_id,
            code = message.code,
            "{}",
            message.text
        ),
        Severity::Info | Severity::Success | Severity::Warn => info!(
            store = %store.reference(),
            operation_id,
            code = message.code,
            "{}",
            message.text
        ),
    }
}
