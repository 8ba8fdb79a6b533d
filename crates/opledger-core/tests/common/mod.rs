//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use opledger_core::config::LedgerConfig;
use opledger_core::session::SessionPair;
use opledger_core::store::{FieldDescriptor, Store, StoreDescriptor, StoreRef, TableDescriptor, provision};
use tempfile::TempDir;

/// A provisioned store in a temporary database.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: LedgerConfig,
    pub store_ref: StoreRef,
    pub store: Store,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_descriptor(descriptor(false))
    }

    pub fn with_checksums() -> Self {
        Self::with_descriptor(descriptor(true))
    }

    pub fn with_descriptor(descriptor: StoreDescriptor) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = LedgerConfig::new(dir.path().join("stores.db"));
        config.owner = "integration".to_string();
        config.busy_timeout_ms = 10_000;
        config.grace_window_secs = 10;

        let store_ref = StoreRef::main("sales").expect("store ref");
        let sessions = SessionPair::open(&config).expect("failed to open sessions");
        let store = provision(sessions.main(), &store_ref, &descriptor).expect("provision");
        Self {
            dir,
            config,
            store_ref,
            store,
        }
    }

    pub fn sessions(&self) -> SessionPair {
        SessionPair::open(&self.config).expect("failed to open sessions")
    }

    /// Inserts sequence entries so the next issued id is `next`.
    pub fn advance_sequence_to(&self, next: u64) {
        let sessions = self.sessions();
        sessions
            .main()
            .execute(
                &format!(
                    "INSERT INTO {} (id, request_type) VALUES (?1, 'LOAD')",
                    self.store.sequence_table()
                ),
                [i64::try_from(next - 1).expect("id fits i64")],
            )
            .expect("seed sequence");
    }

    pub fn insert_active(&self, conn: &rusqlite::Connection, region: &str, amount: i64) {
        conn.execute(
            &format!(
                "INSERT INTO {} (region, amount) VALUES (?1, ?2)",
                self.store.active_table()
            ),
            rusqlite::params![region, amount],
        )
        .expect("insert active row");
    }
}

pub fn descriptor(checksums: bool) -> StoreDescriptor {
    StoreDescriptor::new(TableDescriptor::new(
        "active",
        vec![
            FieldDescriptor::key("region"),
            FieldDescriptor::value("amount").with_type("INTEGER"),
        ],
    ))
    .with_change_log(TableDescriptor::new(
        "change_log",
        vec![
            FieldDescriptor::key("change_id").with_type("INTEGER"),
            FieldDescriptor::value("region"),
        ],
    ))
    .with_checksums(checksums)
}
