//! Runs a unit of work as a ledgered operation.
//!
//! [`OperationRunner::run`] is the one place that composes the ledger's
//! failure semantics:
//!
//! 1. resolve the store through the metadata provider (no ledger write on
//!    failure);
//! 2. open the operation on the durable connection (no ledger write on
//!    failure);
//! 3. run the work inside an immediate main transaction; when the store
//!    records checksums and the kind changes checksummed content, the
//!    recorded checksums are verified first and a mismatch fails the
//!    operation before anything is written;
//! 4. on success, refresh checksums when the store records them, append the
//!    result messages and the kind's success message, mark the operation
//!    FINISHED and commit;
//! 5. on failure, roll back, then durably append one ERROR message per line
//!    of the error chain and the kind's failure message, mark the operation
//!    FAILED and drop its lease. The work's own error is returned.

use std::error::Error;

use rusqlite::Connection;
use tracing::warn;

use super::storage::{OperationHandle, OperationLedger, failure_messages};
use super::types::{Message, OperationKind, Outcome};
use crate::affected::AffectedRequestIndex;
use crate::checksum::{ConsistencyReport, ConsistencyVerifier, MetadataCheck};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::sequence::{IdentitySequencer, RequestType};
use crate::session::SessionPair;
use crate::store::{CatalogMetadataProvider, MetadataProvider, Store, StoreRef};

/// Value returned by a finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<T> {
    /// Id of the finished operation.
    pub operation_id: u64,
    /// What the work returned.
    pub value: T,
}

/// Runs closures as ledgered operations.
#[derive(Debug, Clone)]
pub struct OperationRunner<P = CatalogMetadataProvider> {
    ledger: OperationLedger,
    provider: P,
}

impl OperationRunner {
    /// Runner reading store descriptors from the catalog.
    #[must_use]
    pub fn new(config: &LedgerConfig) -> Self {
        Self::with_provider(config, CatalogMetadataProvider)
    }
}

impl<P: MetadataProvider> OperationRunner<P> {
    /// Runner using `provider` for store descriptors.
    #[must_use]
    pub fn with_provider(config: &LedgerConfig, provider: P) -> Self {
        Self {
            ledger: OperationLedger::new(config),
            provider,
        }
    }

    /// The underlying ledger.
    #[must_use]
    pub const fn ledger(&self) -> &OperationLedger {
        &self.ledger
    }

    /// The metadata provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs `work` as an operation of `kind` against `store`.
    ///
    /// # Errors
    ///
    /// Returns the error of `work`, or a ledger error converted into `E`
    /// when the store cannot be resolved, the operation cannot be opened or
    /// closed.
    pub fn run<T, E, F>(
        &self,
        sessions: &SessionPair,
        store: &StoreRef,
        kind: OperationKind,
        start: &Message,
        work: F,
    ) -> Result<Completed<T>, E>
    where
        F: FnOnce(&mut OperationContext<'_>) -> Result<T, E>,
        E: From<LedgerError> + Error + 'static,
    {
        let store = self.provider.resolve(sessions.durable(), store)?;
        let handle = self.ledger.open(sessions.durable(), &store, &kind, start)?;
        let operation_id = handle.operation_id();

        let unit = match sessions.begin() {
            Ok(unit) => unit,
            Err(e) => {
                self.abandon(sessions.durable(), handle, &e);
                return Err(e.into());
            },
        };

        let mut ctx = OperationContext {
            conn: unit.conn(),
            store: &store,
            operation_id,
            ledger: &self.ledger,
            results: Vec::new(),
        };
        let outcome = verify_checksums(&ctx, &kind)
            .map_err(E::from)
            .and_then(|()| work(&mut ctx))
            .and_then(|value| {
                refresh_checksums(&ctx, &kind)?;
                Ok(value)
            });
        let mut messages = ctx.results;

        match outcome {
            Ok(value) => {
                messages.push(kind.success_message());
                self.ledger
                    .close(unit, handle, Outcome::Finished, &messages)?;
                Ok(Completed {
                    operation_id,
                    value,
                })
            },
            Err(err) => {
                let messages = failure_messages(&kind, &err);
                if let Err(e) = self.ledger.close(unit, handle, Outcome::Failed, &messages) {
                    warn!(operation_id, error = %e, "failed to close failed operation");
                }
                Err(err)
            },
        }
    }

    fn abandon(&self, durable: &Connection, handle: OperationHandle, err: &LedgerError) {
        let messages = failure_messages(handle.kind(), err);
        self.ledger.record_failure(durable, &handle, &messages);
        handle.release();
    }
}

/// Targets whose checksum an operation of `kind` maintains; `None` when the
/// store does not record checksums or the kind changes nothing checksummed.
fn checksummed_targets(store: &Store, kind: &OperationKind) -> Option<(bool, bool)> {
    let descriptor = store.descriptor();
    if !descriptor.compute_checksum {
        return None;
    }
    let active = kind.changes_active();
    let change_log = kind.changes_change_log() && descriptor.change_log.is_some();
    (active || change_log).then_some((active, change_log))
}

fn verify_checksums(ctx: &OperationContext<'_>, kind: &OperationKind) -> Result<(), LedgerError> {
    match checksummed_targets(ctx.store, kind) {
        Some((active, change_log)) => ctx.check_consistency(active, change_log).map(drop),
        None => Ok(()),
    }
}

fn refresh_checksums(ctx: &OperationContext<'_>, kind: &OperationKind) -> Result<(), LedgerError> {
    match checksummed_targets(ctx.store, kind) {
        Some((active, change_log)) => ctx.update_checksum(active, change_log),
        None => Ok(()),
    }
}

/// What the work of an operation sees.
///
/// Every write goes through the main transaction and is rolled back if the
/// work fails.
#[derive(Debug)]
pub struct OperationContext<'a> {
    conn: &'a Connection,
    store: &'a Store,
    operation_id: u64,
    ledger: &'a OperationLedger,
    results: Vec<Message>,
}

impl<'a> OperationContext<'a> {
    /// Connection executing the main transaction.
    #[must_use]
    pub const fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// The resolved store.
    #[must_use]
    pub const fn store(&self) -> &'a Store {
        self.store
    }

    /// Id of the running operation.
    #[must_use]
    pub const fn operation_id(&self) -> u64 {
        self.operation_id
    }

    /// Appends progress messages.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMessageList` or a database error.
    pub fn append_messages(&self, messages: &[Message]) -> Result<(), LedgerError> {
        self.ledger
            .append_messages(self.conn, self.store, self.operation_id, messages)
    }

    /// Records the operation's parameters.
    ///
    /// # Errors
    ///
    /// Returns a database or serialization error.
    pub fn set_details(&self, details: &serde_json::Value) -> Result<(), LedgerError> {
        self.ledger
            .set_details(self.conn, self.store, self.operation_id, details)
    }

    /// Records the requests this operation affects.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn record_affected(&self, request_ids: &[u64]) -> Result<usize, LedgerError> {
        AffectedRequestIndex::new().record(self.conn, self.store, self.operation_id, request_ids)
    }

    /// Claims a request id from the store's counter.
    ///
    /// # Errors
    ///
    /// Returns `SequenceExhausted` or a database error.
    pub fn next_id(&self, request_type: RequestType) -> Result<u64, LedgerError> {
        IdentitySequencer::new().next_id(self.conn, self.store, request_type)
    }

    /// Recomputes and records checksums on this operation.
    ///
    /// # Errors
    ///
    /// See [`ConsistencyVerifier::update_checksum`].
    pub fn update_checksum(&self, active: bool, change_log: bool) -> Result<(), LedgerError> {
        ConsistencyVerifier::new().update_checksum(
            self.conn,
            self.store,
            self.operation_id,
            active,
            change_log,
        )
    }

    /// Compares stored and current checksums.
    ///
    /// # Errors
    ///
    /// See [`ConsistencyVerifier::check_consistency`].
    pub fn check_consistency(&self, active: bool, change_log: bool) -> Result<ConsistencyReport, LedgerError> {
        ConsistencyVerifier::new().check_consistency(self.conn, self.store, active, change_log)
    }

    /// Runs the metadata check of the store and queues its result messages.
    ///
    /// # Errors
    ///
    /// See [`ConsistencyVerifier::check_metadata`].
    pub fn check_metadata(&mut self) -> Result<MetadataCheck, LedgerError> {
        let check = ConsistencyVerifier::new().check_metadata(self.conn, self.store)?;
        self.results.extend(check.result_messages());
        Ok(check)
    }

    /// Queues a message appended when the operation finishes, before the
    /// kind's success message. Discarded if the work fails.
    pub fn push_result(&mut self, message: Message) {
        self.results.push(message);
    }
}
