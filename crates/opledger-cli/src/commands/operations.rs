//! `opledger operations`: list operations, show one, print its log.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use opledger_core::config::LedgerConfig;
use opledger_core::ledger::{OperationFilter, OperationLedger, OperationStatus};

use super::{Output, format_millis, open_store};

/// Operation inspection subcommands.
#[derive(Debug, Subcommand)]
pub enum OperationsCommand {
    /// List operations, most recently updated first
    List(ListArgs),

    /// Show one operation record
    Show(OperationArgs),

    /// Print the messages of one operation
    Log(OperationArgs),
}

/// Arguments for `opledger operations list`.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Store as `schema.store` or `store`
    pub store: String,

    /// Only operations of this kind, e.g. ACTIVATE
    #[arg(long)]
    pub kind: Option<String>,

    /// Only operations in this status (RUNNING, FINISHED, FAILED)
    #[arg(long)]
    pub status: Option<String>,

    /// Only operations of this owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Maximum number of operations
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: u32,
}

/// Arguments naming one operation.
#[derive(Debug, Args)]
pub struct OperationArgs {
    /// Store as `schema.store` or `store`
    pub store: String,

    /// Operation id
    pub id: u64,
}

pub fn run(config: &LedgerConfig, cmd: &OperationsCommand, output: Output) -> Result<()> {
    let ledger = OperationLedger::new(config);
    match cmd {
        OperationsCommand::List(args) => {
            let status = args
                .status
                .as_deref()
                .map(str::parse::<OperationStatus>)
                .transpose()
                .context("invalid --status")?;
            let filter = OperationFilter {
                kind: args.kind.as_ref().map(|kind| kind.to_uppercase()),
                status,
                owner: args.owner.clone(),
                limit: Some(args.limit),
                ..OperationFilter::default()
            };
            let (sessions, store) = open_store(config, &args.store)?;
            let records = ledger
                .list_operations(sessions.main(), &store, &filter)
                .context("failed to list operations")?;
            output.emit(&records, |records| {
                if records.is_empty() {
                    println!("No operations");
                    return;
                }
                println!("{:>8}  {:<20} {:<9} {:<16} LAST UPDATE", "ID", "KIND", "STATUS", "OWNER");
                for record in records {
                    println!(
                        "{:>8}  {:<20} {:<9} {:<16} {}",
                        record.operation_id,
                        record.kind,
                        record.status,
                        record.owner,
                        format_millis(record.last_updated_at)
                    );
                }
            })
        },
        OperationsCommand::Show(args) => {
            let (sessions, store) = open_store(config, &args.store)?;
            let record = ledger
                .operation(sessions.main(), &store, args.id)
                .with_context(|| format!("failed to read operation {}", args.id))?;
            output.emit(&record, |record| {
                println!("Operation {}", record.operation_id);
                println!("  kind:         {}", record.kind);
                println!("  status:       {}", record.status);
                println!("  owner:        {}", record.owner);
                println!("  started:      {}", format_millis(record.started_at));
                println!("  last update:  {}", format_millis(record.last_updated_at));
                if !record.details.is_null() {
                    println!("  details:      {}", record.details);
                }
                if !record.checksum_active.is_empty() {
                    println!("  active hash:  {}", record.checksum_active);
                }
                if !record.checksum_changelog.is_empty() {
                    println!("  changelog hash: {}", record.checksum_changelog);
                }
            })
        },
        OperationsCommand::Log(args) => {
            let (sessions, store) = open_store(config, &args.store)?;
            let entries = ledger
                .messages(sessions.main(), &store, args.id)
                .with_context(|| format!("failed to read messages of operation {}", args.id))?;
            output.emit(&entries, |entries| {
                for entry in entries {
                    println!(
                        "{:>4} {} {} {:>5} {}",
                        entry.seq_no,
                        format_millis(entry.logged_at),
                        entry.message.severity.code(),
                        entry.message.code,
                        entry.message.text
                    );
                }
            })
        },
    }
}
