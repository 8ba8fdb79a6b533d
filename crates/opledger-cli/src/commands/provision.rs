//! `opledger provision`: create the tables of a store from a JSON descriptor.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use opledger_core::config::LedgerConfig;
use opledger_core::store::{StoreDescriptor, provision};
use serde::Serialize;
use tracing::info;

use super::{Output, open_sessions, parse_store};

/// Arguments for `opledger provision`.
#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Store as `schema.store` or `store`
    pub store: String,

    /// JSON file describing the active table and optional change log
    #[arg(long)]
    pub descriptor: PathBuf,
}

#[derive(Debug, Serialize)]
struct Provisioned {
    store: String,
    active_table: String,
    change_log_table: Option<String>,
    compute_checksum: bool,
}

pub fn run(config: &LedgerConfig, args: &ProvisionArgs, output: Output) -> Result<()> {
    let reference = parse_store(&args.store)?;
    let content = std::fs::read_to_string(&args.descriptor)
        .with_context(|| format!("failed to read {}", args.descriptor.display()))?;
    let descriptor: StoreDescriptor =
        serde_json::from_str(&content).context("invalid store descriptor")?;

    let sessions = open_sessions(config)?;
    let store = provision(sessions.main(), &reference, &descriptor)
        .with_context(|| format!("failed to provision {reference}"))?;
    info!(
        store = %reference,
        active = %store.active_table(),
        checksums = store.descriptor().compute_checksum,
        "store provisioned"
    );

    let provisioned = Provisioned {
        store: reference.to_string(),
        active_table: store.active_table(),
        change_log_table: store.change_log_table(),
        compute_checksum: store.descriptor().compute_checksum,
    };
    output.emit(&provisioned, |p| {
        println!("Provisioned store {}", p.store);
        println!("  active:     {}", p.active_table);
        if let Some(change_log) = &p.change_log_table {
            println!("  change log: {change_log}");
        }
        println!("  checksums:  {}", if p.compute_checksum { "on" } else { "off" });
    })
}
