//! Tests for the operation ledger.

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::lease::list_leases;
use crate::session::SessionPair;
use crate::store::{FieldDescriptor, Store, StoreDescriptor, StoreRef, TableDescriptor, provision};

struct Fixture {
    _dir: TempDir,
    config: LedgerConfig,
    sessions: SessionPair,
    store: Store,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut config = LedgerConfig::new(dir.path().join("stores.db"));
    config.owner = "tester".to_string();
    config.busy_timeout_ms = 1_000;
    let sessions = SessionPair::open(&config).expect("failed to open sessions");
    let descriptor = StoreDescriptor::new(TableDescriptor::new(
        "active",
        vec![FieldDescriptor::key("id").with_type("INTEGER"), FieldDescriptor::value("v")],
    ));
    let store = provision(
        sessions.main(),
        &StoreRef::main("ledger_test").expect("store ref"),
        &descriptor,
    )
    .expect("failed to provision store");
    Fixture {
        _dir: dir,
        config,
        sessions,
        store,
    }
}

fn texts(entries: &[LogEntry]) -> Vec<(u64, Severity, String)> {
    entries
        .iter()
        .map(|entry| (entry.seq_no, entry.message.severity, entry.message.text.clone()))
        .collect()
}

#[test]
fn open_commits_running_record_lease_and_start_message() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);

    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Activate,
            &Message::info(2001, "Start of Activation: [3]"),
        )
        .expect("open");

    let record = ledger
        .operation(fx.sessions.main(), &fx.store, handle.operation_id())
        .expect("record");
    assert_eq!(record.status, OperationStatus::Running);
    assert_eq!(record.kind, "ACTIVATE");
    assert_eq!(record.owner, "tester");
    assert_eq!(record.details, serde_json::Value::Null);
    assert_eq!(record.started_at, record.last_updated_at);

    assert_eq!(
        list_leases(fx.sessions.main(), &fx.store).expect("leases"),
        vec![handle.operation_id()]
    );
    let messages = ledger
        .messages(fx.sessions.main(), &fx.store, handle.operation_id())
        .expect("messages");
    assert_eq!(
        texts(&messages),
        vec![(0, Severity::Info, "Start of Activation: [3]".to_string())]
    );
    assert_eq!(messages[0].message.code, 2001);
}

#[test]
fn appended_messages_get_dense_sequence_numbers() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Load,
            &Message::info(1001, "start"),
        )
        .expect("open");
    let id = handle.operation_id();

    ledger
        .append_messages(
            fx.sessions.durable(),
            &fx.store,
            id,
            &[Message::warn(1, "slow"), Message::info(2, "halfway")],
        )
        .expect("append");
    ledger
        .append_messages(fx.sessions.durable(), &fx.store, id, &[Message::error(3, "bad row")])
        .expect("append");

    let seqs: Vec<u64> = ledger
        .messages(fx.sessions.main(), &fx.store, id)
        .expect("messages")
        .iter()
        .map(|entry| entry.seq_no)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
}

#[test]
fn append_rejects_empty_lists_and_unknown_operations() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let conn = fx.sessions.durable();

    assert!(matches!(
        ledger.append_messages(conn, &fx.store, 1, &[]),
        Err(LedgerError::EmptyMessageList { operation_id: 1 })
    ));
    assert!(matches!(
        ledger.append_messages(conn, &fx.store, 42, &[Message::info(1, "x")]),
        Err(LedgerError::NotFound { entity: "operation", .. })
    ));
}

#[test]
fn set_details_overwrites_and_reports_unknown_ids() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::DeleteWithFilter,
            &Message::info(14001, "start"),
        )
        .expect("open");
    let conn = fx.sessions.durable();

    ledger
        .set_details(conn, &fx.store, handle.operation_id(), &json!({"filter": "a"}))
        .expect("details");
    ledger
        .set_details(conn, &fx.store, handle.operation_id(), &json!({"filter": "b"}))
        .expect("details");
    let record = ledger
        .operation(conn, &fx.store, handle.operation_id())
        .expect("record");
    assert_eq!(record.details, json!({"filter": "b"}));

    assert!(matches!(
        ledger.set_details(conn, &fx.store, 999, &json!({})),
        Err(LedgerError::NotFound { .. })
    ));
}

#[test]
fn finished_removes_lease_and_terminal_status_is_sticky() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Rollback,
            &Message::info(4001, "start"),
        )
        .expect("open");
    let id = handle.operation_id();
    let conn = fx.sessions.durable();

    ledger
        .update_status(conn, &fx.store, id, OperationStatus::Finished)
        .expect("finish");
    assert!(list_leases(conn, &fx.store).expect("leases").is_empty());

    for next in [
        OperationStatus::Running,
        OperationStatus::Failed,
        OperationStatus::Finished,
    ] {
        match ledger.update_status(conn, &fx.store, id, next) {
            Err(LedgerError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, OperationStatus::Finished);
                assert_eq!(to, next);
            },
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }
    assert_eq!(
        ledger.status(conn, &fx.store, id).expect("status"),
        OperationStatus::Finished
    );
}

#[test]
fn failed_keeps_lease_row_until_caller_removes_it() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Load,
            &Message::info(1001, "start"),
        )
        .expect("open");
    let conn = fx.sessions.durable();

    ledger
        .update_status(conn, &fx.store, handle.operation_id(), OperationStatus::Failed)
        .expect("fail");
    assert_eq!(
        list_leases(conn, &fx.store).expect("leases"),
        vec![handle.operation_id()]
    );
}

#[test]
fn update_status_of_unknown_operation_is_not_found() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);

    assert!(matches!(
        ledger.update_status(
            fx.sessions.durable(),
            &fx.store,
            77,
            OperationStatus::Finished
        ),
        Err(LedgerError::NotFound { .. })
    ));
}

#[test]
fn close_finished_commits_work_and_messages() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Activate,
            &Message::info(2001, "start"),
        )
        .expect("open");
    let id = handle.operation_id();
    let lease_file = ledger.registry().lease_path(fx.store.reference(), id);
    assert!(lease_file.exists());

    let unit = fx.sessions.begin().expect("begin");
    unit.conn()
        .execute(
            &format!("INSERT INTO {} (id, v) VALUES (1, 'a')", fx.store.active_table()),
            [],
        )
        .expect("work");
    ledger
        .close(
            unit,
            handle,
            Outcome::Finished,
            &[OperationKind::Activate.success_message()],
        )
        .expect("close");

    let conn = fx.sessions.main();
    let rows: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", fx.store.active_table()),
            [],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(rows, 1);
    assert_eq!(
        ledger.status(conn, &fx.store, id).expect("status"),
        OperationStatus::Finished
    );
    let messages = ledger.messages(conn, &fx.store, id).expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].message.severity, Severity::Success);
    assert!(!lease_file.exists());
}

#[test]
fn close_failed_rolls_back_work_but_keeps_the_audit_trail() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Activate,
            &Message::info(2001, "start"),
        )
        .expect("open");
    let id = handle.operation_id();

    let unit = fx.sessions.begin().expect("begin");
    unit.conn()
        .execute(
            &format!("INSERT INTO {} (id, v) VALUES (1, 'a')", fx.store.active_table()),
            [],
        )
        .expect("work");
    ledger
        .close(
            unit,
            handle,
            Outcome::Failed,
            &[OperationKind::Activate.failure_message()],
        )
        .expect("close");

    let conn = fx.sessions.main();
    let rows: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", fx.store.active_table()),
            [],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(rows, 0);
    assert_eq!(
        ledger.status(conn, &fx.store, id).expect("status"),
        OperationStatus::Failed
    );
    assert!(list_leases(conn, &fx.store).expect("leases").is_empty());
    assert_eq!(
        texts(&ledger.messages(conn, &fx.store, id).expect("messages")),
        vec![
            (0, Severity::Info, "start".to_string()),
            (1, Severity::Error, "Activation failed".to_string()),
        ]
    );
}

#[test]
fn close_finished_is_fenced_against_a_concurrent_failure() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Activate,
            &Message::info(2001, "start"),
        )
        .expect("open");
    let id = handle.operation_id();

    // another process decided the operation is dead
    let other = SessionPair::open(&fx.config).expect("second session");
    ledger
        .update_status(other.durable(), &fx.store, id, OperationStatus::Failed)
        .expect("flip");

    let unit = fx.sessions.begin().expect("begin");
    let err = ledger
        .close(unit, handle, Outcome::Finished, &[])
        .expect_err("close must not overwrite FAILED");
    assert!(matches!(
        err,
        LedgerError::InvalidTransition {
            from: OperationStatus::Failed,
            to: OperationStatus::Finished,
            ..
        }
    ));
    assert_eq!(
        ledger.status(fx.sessions.main(), &fx.store, id).expect("status"),
        OperationStatus::Failed
    );
    assert!(list_leases(fx.sessions.main(), &fx.store).expect("leases").is_empty());
}

#[test]
fn list_operations_filters_and_orders_by_last_update() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let conn = fx.sessions.durable();

    let mut ids = Vec::new();
    for kind in [OperationKind::Load, OperationKind::Activate, OperationKind::Load] {
        let handle = ledger
            .open(conn, &fx.store, &kind, &kind.start_message(""))
            .expect("open");
        ids.push(handle.operation_id());
        ledger
            .update_status(conn, &fx.store, handle.operation_id(), OperationStatus::Finished)
            .expect("finish");
    }
    // make the first operation the most recently updated one
    ledger
        .set_details(conn, &fx.store, ids[0], &json!({"touched": true}))
        .expect("details");
    conn.execute(
        &format!(
            "UPDATE {} SET last_updated_at = last_updated_at + 60000 WHERE operation_id = ?1",
            fx.store.operations_table()
        ),
        [ids[0] as i64],
    )
    .expect("bump");

    let loads = ledger
        .list_operations(
            conn,
            &fx.store,
            &OperationFilter {
                kind: Some("LOAD".to_string()),
                ..OperationFilter::default()
            },
        )
        .expect("list");
    let load_ids: Vec<u64> = loads.iter().map(|record| record.operation_id).collect();
    assert_eq!(load_ids, vec![ids[0], ids[2]]);

    let limited = ledger
        .list_operations(
            conn,
            &fx.store,
            &OperationFilter {
                status: Some(OperationStatus::Finished),
                min_id: Some(ids[1]),
                limit: Some(1),
                ..OperationFilter::default()
            },
        )
        .expect("list");
    assert_eq!(limited.len(), 1);
    assert!(limited[0].operation_id >= ids[1]);
}

#[test]
fn missing_message_text_is_rendered_as_placeholder() {
    let fx = fixture();
    let ledger = OperationLedger::new(&fx.config);
    let handle = ledger
        .open(
            fx.sessions.durable(),
            &fx.store,
            &OperationKind::Load,
            &Message::info(1001, "start"),
        )
        .expect("open");
    fx.sessions
        .durable()
        .execute(
            &format!(
                "UPDATE {} SET text = NULL WHERE operation_id = ?1",
                fx.store.messages_table()
            ),
            [handle.operation_id() as i64],
        )
        .expect("null text");

    let messages = ledger
        .messages(fx.sessions.main(), &fx.store, handle.operation_id())
        .expect("messages");
    assert_eq!(messages[0].message.text, MISSING_MESSAGE_TEXT);
}

#[test]
fn failure_messages_flatten_the_error_chain() {
    let err = LedgerError::InvalidArgument {
        field: "store",
        reason: "no data store provided".to_string(),
    };
    let messages = failure_messages(&OperationKind::DeleteAll, &err);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].code, ERROR_DETAIL_CODE);
    assert_eq!(
        messages[0].text,
        "invalid argument store: no data store provided"
    );
    assert_eq!(messages[1], OperationKind::DeleteAll.failure_message());
    assert_eq!(messages[1].code, 9003);
}

#[test]
fn kinds_round_trip_through_their_stored_names() {
    for kind in [
        OperationKind::Load,
        OperationKind::Activate,
        OperationKind::Rollback,
        OperationKind::DeleteWithFilter,
        OperationKind::DeleteRequests,
        OperationKind::DeleteAll,
        OperationKind::CleanupChangelog,
        OperationKind::CleanupMetadata,
        OperationKind::CheckConsistency,
        OperationKind::Repair,
        OperationKind::Custom("REINDEX".to_string()),
    ] {
        assert_eq!(kind.as_str().parse::<OperationKind>().expect("parse"), kind);
    }
    assert_eq!(OperationKind::Load.failure_message().text, "Load failed");
    assert!("".parse::<OperationKind>().is_err());
}
