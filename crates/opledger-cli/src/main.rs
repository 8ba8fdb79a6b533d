//! opledger - operator CLI for the operation ledger
//!
//! Provisions stores, inspects operations and their logs, and runs the
//! maintenance operations (lease recovery, consistency check, retention
//! cleanup) against a store database.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opledger_core::config::LedgerConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// opledger - operation ledger administration
#[derive(Parser, Debug)]
#[command(name = "opledger")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the ledger configuration file
    #[arg(short, long, default_value = "opledger.toml")]
    config: PathBuf,

    /// Database file; overrides the configuration file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the ledger and content tables of a store
    Provision(commands::provision::ProvisionArgs),

    /// Inspect operations
    #[command(subcommand)]
    Operations(commands::operations::OperationsCommand),

    /// List issued request ids
    Requests(commands::requests::RequestsArgs),

    /// Fail operations whose owner died and drop stale lease rows
    Recover {
        /// Store as `schema.store` or `store`
        store: String,
    },

    /// Compare recorded checksums with the current content
    Check(commands::maintenance::CheckArgs),

    /// Delete old terminal ledger records
    Cleanup(commands::maintenance::CleanupArgs),
}

fn load_config(cli: &Cli) -> Result<LedgerConfig> {
    if cli.config.exists() {
        let mut config = LedgerConfig::from_file(&cli.config)
            .with_context(|| format!("failed to load config {}", cli.config.display()))?;
        if let Some(database) = &cli.database {
            config.database_path.clone_from(database);
        }
        return Ok(config);
    }
    let database = cli.database.clone().with_context(|| {
        format!(
            "config file {} not found and no --database given",
            cli.config.display()
        )
    })?;
    let config = LedgerConfig::new(database);
    config.validate().context("invalid default configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(&cli)?;
    let output = commands::Output { json: cli.json };

    match cli.command {
        Commands::Provision(args) => commands::provision::run(&config, &args, output),
        Commands::Operations(cmd) => commands::operations::run(&config, &cmd, output),
        Commands::Requests(args) => commands::requests::run(&config, &args, output),
        Commands::Recover { store } => commands::maintenance::recover(&config, &store, output),
        Commands::Check(args) => commands::maintenance::check(&config, &args, output),
        Commands::Cleanup(args) => commands::maintenance::cleanup(&config, &args, output),
    }
}
