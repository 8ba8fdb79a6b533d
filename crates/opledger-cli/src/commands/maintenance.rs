//! Maintenance commands. Each runs as a ledger operation of its own, so its
//! outcome shows up in `opledger operations list`.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Args;
use opledger_core::checksum::{ChecksumPair, MetadataCheck};
use opledger_core::config::{LedgerConfig, RetentionConfig};
use opledger_core::ledger::{OperationKind, OperationRunner};
use opledger_core::recovery::LeaseRecovery;
use opledger_core::retention::{Retention, RetentionPolicy};
use serde::Serialize;
use tracing::info;

use super::{Output, open_sessions, parse_store};

/// Arguments for `opledger check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Store as `schema.store` or `store`
    pub store: String,
}

/// Arguments for `opledger cleanup`.
#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Store as `schema.store` or `store`
    pub store: String,

    /// Keep operations with a higher id
    #[arg(long)]
    pub max_operation_id: Option<u64>,

    /// Keep operations updated within this many days; defaults to the
    /// configured retention
    #[arg(long)]
    pub max_age_days: Option<u32>,
}

pub fn recover(config: &LedgerConfig, store: &str, output: Output) -> Result<()> {
    let reference = parse_store(store)?;
    let sessions = open_sessions(config)?;
    info!(store = %reference, "starting lease recovery");
    let report = LeaseRecovery::new(config)
        .run(&sessions, &reference)
        .with_context(|| format!("lease recovery of {reference} failed"))?;
    info!(
        store = %reference,
        operation_id = report.operation_id,
        repaired = report.repaired.len(),
        "lease recovery finished"
    );
    output.emit(&report, |report| {
        println!("Repair operation {}", report.operation_id);
        println!("  failed orphans: {:?}", report.repaired);
        println!("  still alive:    {:?}", report.alive);
        println!("  stale leases:   {}", report.stale_leases_removed);
    })
}

#[derive(Debug, Serialize)]
struct CheckResult {
    operation_id: u64,
    #[serde(flatten)]
    check: MetadataCheck,
}

/// Runs a consistency check operation. The operation finishes and records
/// what it found; an inconsistent store is reported as an error afterwards.
pub fn check(config: &LedgerConfig, args: &CheckArgs, output: Output) -> Result<()> {
    let reference = parse_store(&args.store)?;
    let sessions = open_sessions(config)?;

    let kind = OperationKind::CheckConsistency;
    let start = kind.start_message("");
    info!(store = %reference, "starting consistency check");
    let done = OperationRunner::new(config)
        .run(&sessions, &reference, kind, &start, |ctx| ctx.check_metadata())
        .with_context(|| format!("consistency check of {reference} failed"))?;
    info!(
        store = %reference,
        operation_id = done.operation_id,
        consistent = done.value.is_consistent(),
        "consistency check finished"
    );

    let result = CheckResult {
        operation_id: done.operation_id,
        check: done.value,
    };
    output.emit(&result, |result| {
        println!("Check operation {}", result.operation_id);
        if !result.check.checksums_enabled {
            println!("  checksums disabled, nothing compared");
        }
        print_pair("active", result.check.report.active.as_ref());
        print_pair("change log", result.check.report.change_log.as_ref());
        for line in &result.check.inconsistencies {
            println!("  inconsistent: {line}");
        }
    })?;

    if !result.check.is_consistent() {
        bail!(
            "store {reference} is inconsistent, see operation {}",
            result.operation_id
        );
    }
    Ok(())
}

fn print_pair(label: &str, pair: Option<&ChecksumPair>) {
    match pair {
        None => {},
        Some(pair) if pair.stored.is_empty() => {
            println!("  {label}: no recorded checksum, current {}", or_empty(&pair.computed));
        },
        Some(pair) if pair.diverged() => println!(
            "  {label}: stored {} != current {}",
            pair.stored,
            or_empty(&pair.computed)
        ),
        Some(pair) => println!("  {label}: ok ({})", or_empty(&pair.computed)),
    }
}

fn or_empty(hash: &str) -> &str {
    if hash.is_empty() { "<empty>" } else { hash }
}

pub fn cleanup(config: &LedgerConfig, args: &CleanupArgs, output: Output) -> Result<()> {
    let reference = parse_store(&args.store)?;
    let sessions = open_sessions(config)?;

    let mut policy = RetentionPolicy::from_config(
        &RetentionConfig {
            max_age_days: args.max_age_days.unwrap_or(config.retention.max_age_days),
        },
        Utc::now(),
    );
    policy.max_operation_id = args.max_operation_id;

    info!(store = %reference, max_operation_id = ?policy.max_operation_id, "starting cleanup");
    let report = Retention::new(config)
        .cleanup(&sessions, &reference, &policy)
        .with_context(|| format!("cleanup of {reference} failed"))?;
    info!(
        store = %reference,
        operation_id = report.operation_id,
        operations = report.operations,
        "cleanup finished"
    );
    output.emit(&report, |report| {
        println!("Cleanup operation {}", report.operation_id);
        println!("  operations:        {}", report.operations);
        println!("  messages:          {}", report.messages);
        println!("  affected requests: {}", report.affected_requests);
        println!("  sequence entries:  {}", report.sequence_entries);
    })
}

#[cfg(test)]
mod tests {
    use opledger_core::LedgerError;
    use opledger_core::ledger::{OperationFilter, OperationLedger, OperationStatus};
    use opledger_core::store::{FieldDescriptor, StoreDescriptor, StoreRef, TableDescriptor, provision};
    use tempfile::TempDir;

    use super::*;
    use crate::commands::open_store;

    fn provisioned() -> (TempDir, LedgerConfig) {
        let dir = TempDir::new().expect("temp dir");
        let config = LedgerConfig::new(dir.path().join("stores.db"));
        let sessions = open_sessions(&config).expect("sessions");
        let descriptor = StoreDescriptor::new(TableDescriptor::new(
            "active",
            vec![FieldDescriptor::key("region")],
        ))
        .with_checksums(true);
        provision(sessions.main(), &StoreRef::main("sales").expect("ref"), &descriptor)
            .expect("provision");
        (dir, config)
    }

    #[test]
    fn maintenance_commands_record_finished_operations() {
        let (_dir, config) = provisioned();
        let output = Output { json: true };

        recover(&config, "sales", output).expect("recover");
        check(
            &config,
            &CheckArgs {
                store: "sales".to_string(),
            },
            output,
        )
        .expect("check");
        cleanup(
            &config,
            &CleanupArgs {
                store: "sales".to_string(),
                max_operation_id: None,
                max_age_days: Some(0),
            },
            output,
        )
        .expect("cleanup");

        let (sessions, store) = open_store(&config, "sales").expect("store");
        let records = OperationLedger::new(&config)
            .list_operations(sessions.main(), &store, &OperationFilter::default())
            .expect("list");
        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|record| record.status == OperationStatus::Finished));
        assert_eq!(records[0].kind, "CLEANUP_METADATA");
    }

    #[test]
    fn check_without_recorded_checksum_says_so() {
        let (_dir, config) = provisioned();
        let args = CheckArgs {
            store: "sales".to_string(),
        };
        check(&config, &args, Output { json: true }).expect("check");

        let (sessions, store) = open_store(&config, "sales").expect("store");
        let ledger = OperationLedger::new(&config);
        let records = ledger
            .list_operations(sessions.main(), &store, &OperationFilter::default())
            .expect("list");
        let texts: Vec<String> = ledger
            .messages(sessions.main(), &store, records[0].operation_id)
            .expect("messages")
            .into_iter()
            .map(|entry| entry.message.text)
            .collect();
        assert!(texts.contains(&"No active checksum recorded, nothing compared".to_string()));
        assert!(!texts.iter().any(|text| text.contains("Checksums match")));
    }

    #[test]
    fn check_of_tampered_store_fails_after_recording() {
        let (_dir, config) = provisioned();
        let (sessions, store) = open_store(&config, "sales").expect("store");
        OperationRunner::new(&config)
            .run(
                &sessions,
                store.reference(),
                OperationKind::Activate,
                &OperationKind::Activate.start_message("north"),
                |ctx| {
                    ctx.conn()
                        .execute(
                            &format!("INSERT INTO {} (region) VALUES ('north')", store.active_table()),
                            [],
                        )?;
                    Ok::<_, LedgerError>(())
                },
            )
            .expect("activate");
        sessions
            .main()
            .execute(
                &format!("INSERT INTO {} (region) VALUES ('rogue')", store.active_table()),
                [],
            )
            .expect("tamper");

        let args = CheckArgs {
            store: "sales".to_string(),
        };
        let err = check(&config, &args, Output { json: true }).expect_err("inconsistent");
        assert!(err.to_string().contains("store main.sales is inconsistent"));

        let records = OperationLedger::new(&config)
            .list_operations(sessions.main(), &store, &OperationFilter::default())
            .expect("list");
        assert_eq!(records[0].kind, "CHECK_CONSISTENCY");
        assert_eq!(records[0].status, OperationStatus::Finished);
    }

    #[test]
    fn recover_of_unknown_store_fails_with_context() {
        let (_dir, config) = provisioned();
        let err = recover(&config, "nowhere", Output { json: false }).expect_err("unknown store");
        assert!(err.to_string().contains("lease recovery of main.nowhere failed"));
    }
}
