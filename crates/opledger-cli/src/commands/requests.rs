//! `opledger requests`: list issued ids and what each was used for.

use anyhow::{Context, Result};
use clap::Args;
use opledger_core::affected::AffectedRequestIndex;
use opledger_core::config::LedgerConfig;
use opledger_core::sequence::{IdentitySequencer, RequestFilter, RequestType};

use super::{Output, open_store};

/// Arguments for `opledger requests`.
#[derive(Debug, Args)]
pub struct RequestsArgs {
    /// Store as `schema.store` or `store`
    pub store: String,

    /// Only ids of this type (OPERATION, LOAD, ACTIVATION)
    #[arg(long = "type")]
    pub request_type: Option<String>,

    /// Lowest id, inclusive
    #[arg(long)]
    pub from: Option<u64>,

    /// Maximum number of ids
    #[arg(short = 'n', long, default_value = "100")]
    pub limit: u32,

    /// Show the operations that affected one request instead
    #[arg(long, conflicts_with_all = ["request_type", "from"])]
    pub history: Option<u64>,
}

pub fn run(config: &LedgerConfig, args: &RequestsArgs, output: Output) -> Result<()> {
    let (sessions, store) = open_store(config, &args.store)?;

    if let Some(request_id) = args.history {
        let history = AffectedRequestIndex::new()
            .operation_history_for_request(sessions.main(), &store, request_id)
            .with_context(|| format!("failed to read history of request {request_id}"))?;
        return output.emit(&history, |history| {
            if history.is_empty() {
                println!("No operation affected request {request_id}");
            }
            for entry in history {
                println!(
                    "{:>8}  {:<20} {:<9} requests {:?}",
                    entry.operation.operation_id,
                    entry.operation.kind,
                    entry.operation.status,
                    entry.affected_requests
                );
            }
        });
    }

    let request_type = args
        .request_type
        .as_deref()
        .map(str::parse::<RequestType>)
        .transpose()
        .context("invalid --type")?;
    let filter = RequestFilter {
        request_type,
        min_id: args.from,
        max_id: None,
        limit: Some(args.limit),
    };
    let sequencer = IdentitySequencer::new();
    let requests = sequencer
        .list_requests(sessions.main(), &store, &filter)
        .context("failed to list requests")?;
    let max = sequencer
        .current_max(sessions.main(), &store)
        .context("failed to read the id counter")?;
    output.emit(&requests, |requests| {
        for request in requests {
            println!("{:>8}  {}", request.id, request.request_type);
        }
        println!("current max id: {max}");
    })
}
