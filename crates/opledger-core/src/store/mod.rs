//! Store references, structural descriptors and the metadata provider.
//!
//! A store is addressed by a `(schema, store)` pair. All tables belonging to
//! the store are named `"<store>.<table>"` inside the `SQLite` schema
//! `<schema>`, so two stores never share a ledger table.
//!
//! The ledger never inspects a store's structure on its own; it asks a
//! [`MetadataProvider`] for a [`StoreDescriptor`] once per operation.
//! [`CatalogMetadataProvider`] serves descriptors persisted by [`provision`].

mod catalog;
mod descriptor;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

pub use catalog::{CATALOG_TABLE, CatalogMetadataProvider, MetadataProvider, provision};
pub use descriptor::{FieldDescriptor, LedgerTableNames, Store, StoreDescriptor, TableDescriptor};

use crate::error::{LedgerError, Result};

/// Reference to a store: the `SQLite` schema plus the store name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreRef {
    schema: String,
    store: String,
}

impl StoreRef {
    /// Creates a validated store reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either part is empty.
    pub fn new(schema: impl Into<String>, store: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let store = store.into();
        if schema.trim().is_empty() {
            return Err(LedgerError::invalid("schema", "no schema provided"));
        }
        if store.trim().is_empty() {
            return Err(LedgerError::invalid("store", "no data store provided"));
        }
        Ok(Self { schema, store })
    }

    /// Store in the connection's `main` schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `store` is empty.
    pub fn main(store: impl Into<String>) -> Result<Self> {
        Self::new("main", store)
    }

    /// The `SQLite` schema name.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The store name.
    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Fully qualified, quoted name of one of the store's tables.
    #[must_use]
    pub fn table(&self, table: &str) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&format!("{}.{}", self.store, table))
        )
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.store)
    }
}

impl FromStr for StoreRef {
    type Err = LedgerError;

    /// Parses `schema.store`, or a bare `store` in the `main` schema. The
    /// first dot separates the schema.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((schema, store)) => Self::new(schema, store),
            None => Self::main(s),
        }
    }
}

/// Quotes an identifier for use in SQL, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
