//! Content hashes of the active snapshot and the change log.
//!
//! # Canonical hash
//!
//! Rows are read ordered by the table's key columns. Each row is rendered as
//! its key columns followed by its non-key columns, every value as text
//! (`NULL` as the empty string, blobs as lowercase hex), joined by `0x1f`,
//! and hashed with SHA-256. The row digests are fed in order into a second
//! SHA-256 whose hex digest is the table hash. An empty table hashes to the
//! empty string, the same value an operation that never computed a checksum
//! records, so it is never compared.
//!
//! Because rows are ordered by key before combining, two tables holding the
//! same rows hash equal however the rows were inserted.
//!
//! # Metadata check
//!
//! [`ConsistencyVerifier::check_metadata`] looks at every table of a store.
//! With checksums enabled it compares stored and current hashes; with them
//! disabled any non-empty stored hash is itself an inconsistency. Findings
//! are reported, not raised, so a check operation finishes and records them.

#![allow(clippy::cast_possible_wrap)]

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::{Message, OperationKind};
use crate::store::{Store, TableDescriptor, quote_ident};

/// Separator between the values of one row.
const FIELD_SEPARATOR: &str = "\u{1f}";

/// Message code of a check that found nothing wrong.
pub const CHECK_PASSED_CODE: u32 = 7_100;

/// Message code noting a table without recorded checksum.
pub const CHECK_NOT_RECORDED_CODE: u32 = 7_101;

/// Message code of one inconsistency found by a check.
pub const CHECK_INCONSISTENCY_CODE: u32 = 7_102;

/// Table a checksum describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The active snapshot.
    Active,
    /// The change log.
    ChangeLog,
}

impl Target {
    const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ChangeLog => "changelog",
        }
    }

    const fn column(self) -> &'static str {
        match self {
            Self::Active => "checksum_active",
            Self::ChangeLog => "checksum_changelog",
        }
    }

    /// Whether a successful operation of `kind` may change the target.
    #[must_use]
    pub const fn changed_by(self, kind: &OperationKind) -> bool {
        match self {
            Self::Active => kind.changes_active(),
            Self::ChangeLog => kind.changes_change_log(),
        }
    }

    /// Operation kinds whose successful completion may change the target.
    #[must_use]
    pub fn changing_kinds(self) -> Vec<OperationKind> {
        [
            OperationKind::Activate,
            OperationKind::Rollback,
            OperationKind::DeleteWithFilter,
            OperationKind::CleanupChangelog,
        ]
        .into_iter()
        .filter(|kind| self.changed_by(kind))
        .collect()
    }
}

/// Stored and recomputed hash of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumPair {
    /// Hash recorded by the last content-changing operation; empty if none.
    pub stored: String,
    /// Hash of the current content.
    pub computed: String,
}

impl ChecksumPair {
    /// Whether a recorded hash differs from the current content.
    #[must_use]
    pub fn diverged(&self) -> bool {
        !self.stored.is_empty() && self.stored != self.computed
    }
}

/// Result of [`ConsistencyVerifier::check_consistency`]. Targets that were
/// not requested, or that the store does not have, are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// The active snapshot.
    pub active: Option<ChecksumPair>,
    /// The change log.
    pub change_log: Option<ChecksumPair>,
}

/// Result of [`ConsistencyVerifier::check_metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataCheck {
    /// Whether the store records checksums. Nothing is compared otherwise.
    pub checksums_enabled: bool,
    /// Compared hashes.
    #[serde(flatten)]
    pub report: ConsistencyReport,
    /// One line per inconsistency found.
    pub inconsistencies: Vec<String>,
}

impl MetadataCheck {
    /// Whether nothing was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    /// Messages recording the outcome on the check operation.
    #[must_use]
    pub fn result_messages(&self) -> Vec<Message> {
        if !self.is_consistent() {
            return self
                .inconsistencies
                .iter()
                .map(|line| Message::error(CHECK_INCONSISTENCY_CODE, line.clone()))
                .collect();
        }
        let mut messages: Vec<Message> = [
            (Target::Active, self.report.active.as_ref()),
            (Target::ChangeLog, self.report.change_log.as_ref()),
        ]
        .into_iter()
        .filter_map(|(target, pair)| pair.filter(|pair| pair.stored.is_empty()).map(|_| target))
        .map(|target| {
            Message::info(
                CHECK_NOT_RECORDED_CODE,
                format!("No {} checksum recorded, nothing compared", target.label()),
            )
        })
        .collect();
        messages.push(Message::info(
            CHECK_PASSED_CODE,
            "CHECK-Result: No inconsistency found",
        ));
        messages
    }
}

/// Computes, records and compares content hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyVerifier;

impl ConsistencyVerifier {
    /// Creates a verifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Canonical hash of a target table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when asked for the change log of a store
    /// without one, or a database error.
    pub fn compute_hash(&self, conn: &Connection, store: &Store, target: Target) -> Result<String> {
        let (table, name) = resolve(store, target)?;
        let columns: Vec<String> = table
            .key_fields()
            .chain(table.value_fields())
            .map(|field| quote_ident(&field.name))
            .collect();
        let keys: Vec<String> = table.key_fields().map(|field| quote_ident(&field.name)).collect();
        let order = if keys.is_empty() { &columns } else { &keys };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {name} ORDER BY {}",
            columns.join(", "),
            order.join(", ")
        ))?;
        let mut rows = stmt.query([])?;

        let mut combined = Sha256::new();
        let mut row_count = 0_u64;
        let mut values = Vec::with_capacity(columns.len());
        while let Some(row) = rows.next()? {
            values.clear();
            for idx in 0..columns.len() {
                values.push(render_value(row.get_ref(idx)?));
            }
            combined.update(Sha256::digest(values.join(FIELD_SEPARATOR).as_bytes()));
            row_count += 1;
        }

        debug!(store = %store.reference(), target = target.label(), rows = row_count, "hash computed");
        if row_count == 0 {
            return Ok(String::new());
        }
        Ok(hex::encode(combined.finalize()))
    }

    /// Hash recorded by the most recent FINISHED operation whose kind may
    /// change `target`; empty if there is none.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn stored_hash(&self, conn: &Connection, store: &Store, target: Target) -> Result<String> {
        let kinds: Vec<String> = target
            .changing_kinds()
            .iter()
            .map(|kind| format!("'{}'", kind.as_str()))
            .collect();
        let stored: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE status = 'FINISHED' AND kind IN ({})
                     ORDER BY operation_id DESC LIMIT 1",
                    target.column(),
                    store.operations_table(),
                    kinds.join(", ")
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.unwrap_or_default())
    }

    /// Compares stored and current hashes of the requested targets. A store
    /// without change log yields `None` for it.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` if a non-empty stored hash differs from
    /// the current one, or a database error.
    pub fn check_consistency(
        &self,
        conn: &Connection,
        store: &Store,
        for_active: bool,
        for_change_log: bool,
    ) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        if for_active {
            report.active = Some(self.compare(conn, store, Target::Active)?);
        }
        if for_change_log && store.descriptor().change_log.is_some() {
            report.change_log = Some(self.compare(conn, store, Target::ChangeLog)?);
        }
        Ok(report)
    }

    /// Checks every table of the store against what the ledger recorded.
    ///
    /// With checksums enabled, a non-empty stored hash must match the current
    /// content. With checksums disabled, no hash may be stored at all.
    /// Inconsistencies are collected in the result rather than returned as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub fn check_metadata(&self, conn: &Connection, store: &Store) -> Result<MetadataCheck> {
        let descriptor = store.descriptor();
        let mut check = MetadataCheck {
            checksums_enabled: descriptor.compute_checksum,
            ..MetadataCheck::default()
        };
        let targets = if descriptor.change_log.is_some() {
            &[Target::Active, Target::ChangeLog][..]
        } else {
            &[Target::Active][..]
        };

        for &target in targets {
            if check.checksums_enabled {
                let pair = self.pair(conn, store, target)?;
                if pair.diverged() {
                    check.inconsistencies.push(
                        LedgerError::ChecksumMismatch {
                            target: target.label(),
                            stored: pair.stored.clone(),
                            computed: pair.computed.clone(),
                        }
                        .to_string(),
                    );
                }
                match target {
                    Target::Active => check.report.active = Some(pair),
                    Target::ChangeLog => check.report.change_log = Some(pair),
                }
            } else {
                let stored = self.stored_hash(conn, store, target)?;
                if !stored.is_empty() {
                    check.inconsistencies.push(format!(
                        "nonempty checksum \"{stored}\" of {} table stored while checksums are disabled",
                        target.label()
                    ));
                }
            }
        }

        if check.is_consistent() {
            info!(store = %store.reference(), checksums = check.checksums_enabled, "no inconsistency found");
        } else {
            warn!(
                store = %store.reference(),
                inconsistencies = check.inconsistencies.len(),
                "store is inconsistent"
            );
        }
        Ok(check)
    }

    fn pair(&self, conn: &Connection, store: &Store, target: Target) -> Result<ChecksumPair> {
        Ok(ChecksumPair {
            stored: self.stored_hash(conn, store, target)?,
            computed: self.compute_hash(conn, store, target)?,
        })
    }

    fn compare(&self, conn: &Connection, store: &Store, target: Target) -> Result<ChecksumPair> {
        let pair = self.pair(conn, store, target)?;
        if pair.diverged() {
            error!(
                store = %store.reference(),
                target = target.label(),
                stored = %pair.stored,
                computed = %pair.computed,
                "checksum mismatch"
            );
            return Err(LedgerError::ChecksumMismatch {
                target: target.label(),
                stored: pair.stored,
                computed: pair.computed,
            });
        }
        Ok(pair)
    }

    /// Recomputes the requested hashes and writes them onto an operation
    /// record. Run inside the transaction of the mutation they describe so
    /// both commit together.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown operation, `InvalidArgument` when
    /// asked for the change log of a store without one, or a database error.
    pub fn update_checksum(
        &self,
        conn: &Connection,
        store: &Store,
        operation_id: u64,
        update_active: bool,
        update_change_log: bool,
    ) -> Result<()> {
        for (wanted, target) in [
            (update_active, Target::Active),
            (update_change_log, Target::ChangeLog),
        ] {
            if !wanted {
                continue;
            }
            let hash = self.compute_hash(conn, store, target)?;
            let updated = conn.execute(
                &format!(
                    "UPDATE {} SET {} = ?1 WHERE operation_id = ?2",
                    store.operations_table(),
                    target.column()
                ),
                params![hash, operation_id as i64],
            )?;
            if updated == 0 {
                return Err(LedgerError::operation_not_found(operation_id));
            }
            info!(
                store = %store.reference(),
                operation_id,
                target = target.label(),
                checksum = %hash,
                "checksum recorded"
            );
        }
        Ok(())
    }
}

fn resolve(store: &Store, target: Target) -> Result<(&TableDescriptor, String)> {
    match target {
        Target::Active => Ok((&store.descriptor().active, store.active_table())),
        Target::ChangeLog => match (&store.descriptor().change_log, store.change_log_table()) {
            (Some(table), Some(name)) => Ok((table, name)),
            _ => Err(LedgerError::invalid(
                "target",
                format!("store {} has no change log", store.reference()),
            )),
        },
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(blob) => hex::encode(blob),
    }
}
