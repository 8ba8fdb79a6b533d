//! Error taxonomy for ledger operations.

use thiserror::Error;

use crate::ledger::OperationStatus;

/// Result alias used throughout the crate.
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Errors that can occur while operating the ledger.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// A required argument (schema, store, identifier) is missing or invalid.
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument {
        /// The offending argument.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// An operation, lease or catalog entry does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What kind of record was looked up.
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Stored and recomputed content hashes differ.
    #[error("checksum mismatch for {target} table: stored \"{stored}\" != computed \"{computed}\"")]
    ChecksumMismatch {
        /// Which table diverged (`active` or `changelog`).
        target: &'static str,
        /// Hash recorded by the last content-changing operation.
        stored: String,
        /// Hash of the current content.
        computed: String,
    },

    /// The store-wide id counter cannot advance any further.
    #[error("id sequence exhausted for store {store}")]
    SequenceExhausted {
        /// The store whose counter overflowed.
        store: String,
    },

    /// The lease of an operation is held by a live process.
    ///
    /// Used by lease recovery to tell live operations from orphans; never
    /// surfaced to callers of the public operations.
    #[error("lease for operation {operation_id} is held by another process")]
    LeaseBusy {
        /// The probed operation.
        operation_id: u64,
    },

    /// A status change that the state machine does not allow.
    #[error("invalid status transition for operation {operation_id}: {from} -> {to}")]
    InvalidTransition {
        /// The operation whose status was to change.
        operation_id: u64,
        /// The current status.
        from: OperationStatus,
        /// The requested status.
        to: OperationStatus,
    },

    /// `append_messages` was called without messages.
    #[error("no messages provided for operation {operation_id}")]
    EmptyMessageList {
        /// The target operation.
        operation_id: u64,
    },

    /// Another process is already repairing running operations of the store.
    #[error("lease recovery already in progress for store {store}")]
    RecoveryInProgress {
        /// The store being repaired.
        store: String,
    },

    /// JSON encoding or decoding of operation details or descriptors failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error on lease lock files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the underlying database.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl LedgerError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn operation_not_found(operation_id: u64) -> Self {
        Self::NotFound {
            entity: "operation",
            id: operation_id.to_string(),
        }
    }

    /// Returns `true` for errors raised by argument validation, which are
    /// returned before any ledger write happens.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::NotFound { .. })
    }
}

/// Renders an error and its `source()` chain as individual lines, outermost
/// first. This is the flattened form written into the message log of a
/// failed operation.
#[must_use]
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        let text = source.to_string();
        // thiserror's `#[error("...: {0}")]` already embeds the source
        if !lines.last().is_some_and(|prev| prev.ends_with(&text)) {
            lines.push(text);
        }
        current = source.source();
    }
    lines
}
