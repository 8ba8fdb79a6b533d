//! Structural descriptors of a store.

use serde::{Deserialize, Serialize};

use super::StoreRef;

/// One column of a content table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name.
    pub name: String,
    /// Whether the column is part of the table's key.
    #[serde(default)]
    pub is_key: bool,
    /// Column type used when provisioning creates the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

impl FieldDescriptor {
    /// Key column.
    #[must_use]
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_key: true,
            sql_type: None,
        }
    }

    /// Non-key column.
    #[must_use]
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_key: false,
            sql_type: None,
        }
    }

    /// Sets the provisioning type.
    #[must_use]
    pub fn with_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }
}

/// A content table (active snapshot or change log).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name relative to the store.
    pub name: String,
    /// Columns in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    /// Creates a table descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Key columns in declaration order.
    pub fn key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| field.is_key)
    }

    /// Non-key columns in declaration order.
    pub fn value_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|field| !field.is_key)
    }
}

/// Names of the ledger's own tables, relative to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerTableNames {
    /// Id generator.
    pub sequence: String,
    /// Operation history.
    pub operations: String,
    /// Operation to request edges.
    pub affected_requests: String,
    /// Leases of running operations.
    pub leases: String,
    /// Operation log messages.
    pub messages: String,
    /// Change subscribers.
    pub subscribers: String,
}

impl Default for LedgerTableNames {
    fn default() -> Self {
        Self {
            sequence: "id_generator".to_string(),
            operations: "operation_history".to_string(),
            affected_requests: "affected_requests".to_string(),
            leases: "running_operations".to_string(),
            messages: "log_messages".to_string(),
            subscribers: "subscribers".to_string(),
        }
    }
}

/// Structural descriptor of a store, as returned by a
/// [`MetadataProvider`](super::MetadataProvider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// The active snapshot.
    pub active: TableDescriptor,
    /// The change log, if the store keeps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_log: Option<TableDescriptor>,
    /// Whether content-changing operations record checksums.
    #[serde(default)]
    pub compute_checksum: bool,
    /// Ledger table names.
    #[serde(default)]
    pub tables: LedgerTableNames,
}

impl StoreDescriptor {
    /// Descriptor with an active table only and default ledger table names.
    #[must_use]
    pub fn new(active: TableDescriptor) -> Self {
        Self {
            active,
            change_log: None,
            compute_checksum: false,
            tables: LedgerTableNames::default(),
        }
    }

    /// Adds a change log.
    #[must_use]
    pub fn with_change_log(mut self, change_log: TableDescriptor) -> Self {
        self.change_log = Some(change_log);
        self
    }

    /// Enables checksum computation.
    #[must_use]
    pub const fn with_checksums(mut self, enabled: bool) -> Self {
        self.compute_checksum = enabled;
        self
    }

    /// Resolves the descriptor against a store reference.
    #[must_use]
    pub fn bind(self, reference: StoreRef) -> Store {
        Store {
            reference,
            descriptor: self,
        }
    }
}

/// A store reference resolved against its descriptor.
///
/// Every ledger component takes a `&Store` so table names are computed in
/// one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    reference: StoreRef,
    descriptor: StoreDescriptor,
}

impl Store {
    /// The store reference.
    #[must_use]
    pub const fn reference(&self) -> &StoreRef {
        &self.reference
    }

    /// The structural descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }

    /// Qualified id generator table.
    #[must_use]
    pub fn sequence_table(&self) -> String {
        self.reference.table(&self.descriptor.tables.sequence)
    }

    /// Qualified operation history table.
    #[must_use]
    pub fn operations_table(&self) -> String {
        self.reference.table(&self.descriptor.tables.operations)
    }

    /// Qualified affected-request edge table.
    #[must_use]
    pub fn affected_table(&self) -> String {
        self.reference.table(&self.descriptor.tables.affected_requests)
    }

    /// Qualified lease table.
    #[must_use]
    pub fn leases_table(&self) -> String {
        self.reference.table(&self.descriptor.tables.leases)
    }

    /// Qualified message table.
    #[must_use]
    pub fn messages_table(&self) -> String {
        self.reference.table(&self.descriptor.tables.messages)
    }

    /// Qualified subscriber table.
    #[must_use]
    pub fn subscribers_table(&self) -> String {
        self.reference.table(&self.descriptor.tables.subscribers)
    }

    /// Qualified active snapshot table.
    #[must_use]
    pub fn active_table(&self) -> String {
        self.reference.table(&self.descriptor.active.name)
    }

    /// Qualified change log table, if any.
    #[must_use]
    pub fn change_log_table(&self) -> Option<String> {
        self.descriptor
            .change_log
            .as_ref()
            .map(|table| self.reference.table(&table.name))
    }
}
