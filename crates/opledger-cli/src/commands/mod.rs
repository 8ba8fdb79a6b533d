//! CLI command implementations.

pub mod maintenance;
pub mod operations;
pub mod provision;
pub mod requests;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use opledger_core::config::LedgerConfig;
use opledger_core::session::SessionPair;
use opledger_core::store::{CatalogMetadataProvider, MetadataProvider, Store, StoreRef};
use serde::Serialize;

/// How results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// Print JSON instead of text.
    pub json: bool,
}

impl Output {
    /// Prints `value` as pretty JSON, or runs `text` otherwise.
    pub fn emit<T: Serialize>(self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("failed to serialize output")?
            );
        } else {
            text(value);
        }
        Ok(())
    }
}

pub fn parse_store(store: &str) -> Result<StoreRef> {
    store
        .parse()
        .with_context(|| format!("invalid store reference '{store}'"))
}

pub fn open_sessions(config: &LedgerConfig) -> Result<SessionPair> {
    SessionPair::open(config)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

/// Opens the database and resolves `store` through the catalog.
pub fn open_store(config: &LedgerConfig, store: &str) -> Result<(SessionPair, Store)> {
    let reference = parse_store(store)?;
    let sessions = open_sessions(config)?;
    let resolved = CatalogMetadataProvider
        .resolve(sessions.main(), &reference)
        .with_context(|| format!("failed to resolve store {reference}"))?;
    Ok((sessions, resolved))
}

pub fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |at| at.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}
