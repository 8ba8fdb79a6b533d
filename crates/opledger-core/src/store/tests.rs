//! Tests for store references, provisioning and the catalog.

use rusqlite::Connection;

use super::*;
use crate::error::LedgerError;

fn descriptor() -> StoreDescriptor {
    StoreDescriptor::new(TableDescriptor::new(
        "active",
        vec![
            FieldDescriptor::key("region"),
            FieldDescriptor::key("day").with_type("INTEGER"),
            FieldDescriptor::value("amount").with_type("REAL"),
        ],
    ))
    .with_change_log(TableDescriptor::new(
        "change_log",
        vec![
            FieldDescriptor::key("change_id").with_type("INTEGER"),
            FieldDescriptor::value("region"),
        ],
    ))
    .with_checksums(true)
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .expect("query sqlite_master")
        == 1
}

#[test]
fn empty_schema_or_store_is_rejected() {
    assert!(matches!(
        StoreRef::new("", "sales"),
        Err(LedgerError::InvalidArgument { field: "schema", .. })
    ));
    assert!(matches!(
        StoreRef::new("main", "  "),
        Err(LedgerError::InvalidArgument { field: "store", .. })
    ));
}

#[test]
fn store_refs_parse_with_optional_schema() {
    let bare: StoreRef = "sales".parse().expect("bare store");
    assert_eq!((bare.schema(), bare.store()), ("main", "sales"));
    let qualified: StoreRef = "archive.sales.eu".parse().expect("qualified store");
    assert_eq!((qualified.schema(), qualified.store()), ("archive", "sales.eu"));
    assert!("archive.".parse::<StoreRef>().is_err());
}

#[test]
fn table_names_are_qualified_and_quoted() {
    let store = StoreRef::main("sa\"les").expect("store ref");
    assert_eq!(store.table("operation_history"), "\"main\".\"sa\"\"les.operation_history\"");
    assert_eq!(store.to_string(), "main.sa\"les");
}

#[test]
fn provision_creates_ledger_and_content_tables() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let store = provision(&conn, &StoreRef::main("sales").expect("store ref"), &descriptor())
        .expect("provision");

    for table in [
        "sales.id_generator",
        "sales.operation_history",
        "sales.affected_requests",
        "sales.running_operations",
        "sales.log_messages",
        "sales.subscribers",
        "sales.active",
        "sales.change_log",
        CATALOG_TABLE,
    ] {
        assert!(table_exists(&conn, table), "missing table {table}");
    }
    assert_eq!(store.change_log_table().as_deref(), Some("\"main\".\"sales.change_log\""));
}

#[test]
fn provision_is_idempotent_and_keeps_rows() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let reference = StoreRef::main("sales").expect("store ref");
    let store = provision(&conn, &reference, &descriptor()).expect("provision");
    conn.execute(
        &format!(
            "INSERT INTO {} (region, day, amount) VALUES ('north', 1, 2.0)",
            store.active_table()
        ),
        [],
    )
    .expect("insert");

    provision(&conn, &reference, &descriptor()).expect("second provision");
    let rows: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", store.active_table()), [], |row| row.get(0))
        .expect("count");
    assert_eq!(rows, 1);
}

#[test]
fn provision_rejects_active_table_without_fields() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let empty = StoreDescriptor::new(TableDescriptor::new("active", Vec::new()));
    assert!(matches!(
        provision(&conn, &StoreRef::main("sales").expect("store ref"), &empty),
        Err(LedgerError::InvalidArgument { .. })
    ));
}

#[test]
fn catalog_returns_the_provisioned_descriptor() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let reference = StoreRef::main("sales").expect("store ref");
    provision(&conn, &reference, &descriptor()).expect("provision");

    let described = CatalogMetadataProvider
        .describe(&conn, &reference)
        .expect("describe");
    assert_eq!(described, descriptor());

    let store = CatalogMetadataProvider
        .resolve(&conn, &reference)
        .expect("resolve");
    assert_eq!(store.reference(), &reference);
    let keys: Vec<&str> = store
        .descriptor()
        .active
        .key_fields()
        .map(|field| field.name.as_str())
        .collect();
    assert_eq!(keys, vec!["region", "day"]);
}

#[test]
fn unknown_store_is_not_found() {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    let reference = StoreRef::main("nowhere").expect("store ref");

    // no catalog table at all
    assert!(matches!(
        CatalogMetadataProvider.describe(&conn, &reference),
        Err(LedgerError::NotFound { entity: "store", .. })
    ));

    provision(&conn, &StoreRef::main("sales").expect("store ref"), &descriptor())
        .expect("provision");
    assert!(matches!(
        CatalogMetadataProvider.describe(&conn, &reference),
        Err(LedgerError::NotFound { entity: "store", .. })
    ));
}

#[test]
fn descriptor_json_uses_default_table_names() {
    let json = r#"{"active": {"name": "active", "fields": [{"name": "id", "is_key": true}]}}"#;
    let parsed: StoreDescriptor = serde_json::from_str(json).expect("parse descriptor");
    assert_eq!(parsed.tables, LedgerTableNames::default());
    assert!(!parsed.compute_checksum);
    assert!(parsed.change_log.is_none());
}
