//! Catalog-backed metadata provider and store provisioning.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::{Store, StoreDescriptor, StoreRef, TableDescriptor, quote_ident};
use crate::error::{LedgerError, Result};

/// Name of the per-schema catalog table.
pub const CATALOG_TABLE: &str = "ledger_catalog";

/// Source of structural descriptors for stores.
///
/// The ledger fetches a descriptor once per operation and never caches it
/// across operations.
pub trait MetadataProvider {
    /// Describes the tables of `store`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the store is unknown, or a database error.
    fn describe(&self, conn: &Connection, store: &StoreRef) -> Result<StoreDescriptor>;

    /// Describes `store` and binds the descriptor to it.
    ///
    /// # Errors
    ///
    /// See [`MetadataProvider::describe`].
    fn resolve(&self, conn: &Connection, store: &StoreRef) -> Result<Store> {
        Ok(self.describe(conn, store)?.bind(store.clone()))
    }
}

/// Reads descriptors from the `ledger_catalog` table written by
/// [`provision`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogMetadataProvider;

impl MetadataProvider for CatalogMetadataProvider {
    fn describe(&self, conn: &Connection, store: &StoreRef) -> Result<StoreDescriptor> {
        let sql = format!(
            "SELECT descriptor FROM {} WHERE store_name = ?1",
            catalog_table(store)
        );
        let json: Option<String> = match conn
            .query_row(&sql, params![store.store()], |row| row.get(0))
            .optional()
        {
            Ok(json) => json,
            // no catalog table yet: the schema holds no provisioned store
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("no such table") => {
                None
            },
            Err(e) => return Err(e.into()),
        };

        let json = json.ok_or_else(|| LedgerError::NotFound {
            entity: "store",
            id: store.to_string(),
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn catalog_table(store: &StoreRef) -> String {
    format!(
        "{}.{}",
        quote_ident(store.schema()),
        quote_ident(CATALOG_TABLE)
    )
}

/// Creates the ledger tables of a store, its content tables when absent, and
/// registers the descriptor in the catalog.
///
/// Provisioning is idempotent; re-provisioning replaces the catalog entry but
/// leaves existing tables and rows untouched.
///
/// # Errors
///
/// Returns a database or serialization error. Nothing is created on error.
pub fn provision(conn: &Connection, reference: &StoreRef, descriptor: &StoreDescriptor) -> Result<Store> {
    if descriptor.active.fields.is_empty() {
        return Err(LedgerError::invalid(
            "descriptor",
            "active table must declare at least one field",
        ));
    }

    let store = descriptor.clone().bind(reference.clone());
    let tables = &descriptor.tables;
    let schema = quote_ident(reference.schema());
    let local = |table: &str| quote_ident(&format!("{}.{}", reference.store(), table));
    let index = |name: &str| {
        format!(
            "{schema}.{}",
            quote_ident(&format!("{}.{}", reference.store(), name))
        )
    };

    let mut ddl = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                store_name TEXT PRIMARY KEY,
                descriptor TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            catalog_table(reference)
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                request_type TEXT NOT NULL
                    CHECK (request_type IN ('OPERATION', 'LOAD', 'ACTIVATION'))
            )",
            store.sequence_table()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                operation_id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('RUNNING', 'FINISHED', 'FAILED')),
                owner TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                last_updated_at INTEGER NOT NULL,
                details TEXT NOT NULL DEFAULT '',
                checksum_active TEXT NOT NULL DEFAULT '',
                checksum_changelog TEXT NOT NULL DEFAULT ''
            )",
            store.operations_table()
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (status, started_at)",
            index("operation_history_by_status"),
            local(&tables.operations)
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                operation_id INTEGER NOT NULL REFERENCES {} (operation_id),
                request_id INTEGER NOT NULL
            )",
            store.affected_table(),
            local(&tables.operations)
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (operation_id)",
            index("affected_requests_by_operation"),
            local(&tables.affected_requests)
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (request_id)",
            index("affected_requests_by_request"),
            local(&tables.affected_requests)
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (operation_id INTEGER PRIMARY KEY)",
            store.leases_table()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                operation_id INTEGER NOT NULL,
                seq_no INTEGER NOT NULL,
                logged_at INTEGER NOT NULL,
                severity TEXT NOT NULL CHECK (severity IN ('I', 'S', 'W', 'E')),
                code INTEGER NOT NULL,
                text TEXT,
                PRIMARY KEY (operation_id, seq_no)
            )",
            store.messages_table()
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                last_request_id INTEGER NOT NULL DEFAULT 0
            )",
            store.subscribers_table()
        ),
        content_table_ddl(&store.active_table(), &descriptor.active),
    ];
    if let (Some(table), Some(name)) = (&descriptor.change_log, store.change_log_table()) {
        ddl.push(content_table_ddl(&name, table));
    }

    let tx = conn.unchecked_transaction()?;
    for statement in &ddl {
        debug!(store = %reference, sql = %statement, "provision");
        tx.execute_batch(statement)?;
    }
    tx.execute(
        &format!(
            "INSERT INTO {} (store_name, descriptor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (store_name) DO UPDATE
             SET descriptor = excluded.descriptor, updated_at = excluded.updated_at",
            catalog_table(reference)
        ),
        params![
            reference.store(),
            serde_json::to_string(descriptor)?,
            crate::now_millis()
        ],
    )?;
    tx.commit()?;

    info!(store = %reference, "store provisioned");
    Ok(store)
}

fn content_table_ddl(qualified: &str, table: &TableDescriptor) -> String {
    let columns: Vec<String> = table
        .fields
        .iter()
        .map(|field| {
            format!(
                "{} {}",
                quote_ident(&field.name),
                field.sql_type.as_deref().unwrap_or("TEXT")
            )
        })
        .collect();
    let keys: Vec<String> = table.key_fields().map(|field| quote_ident(&field.name)).collect();

    let mut body = columns.join(", ");
    if !keys.is_empty() {
        body.push_str(&format!(", PRIMARY KEY ({})", keys.join(", ")));
    }
    format!("CREATE TABLE IF NOT EXISTS {qualified} ({body})")
}
