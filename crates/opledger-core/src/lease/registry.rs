//! File-lock half of a lease.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::store::StoreRef;

/// Name of the per-store lock file that serializes lease recovery.
const RECOVERY_LOCK: &str = "recovery.lock";

/// Directory of lease lock files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRegistry {
    root: PathBuf,
}

/// Result of a non-blocking probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Another open file description holds the lock; the operation is alive.
    Held,
    /// The lock was free and is now held by the prober.
    Acquired(LeaseGuard),
}

/// An exclusively locked lease file. Dropping the guard releases the lock.
#[derive(Debug)]
pub struct LeaseGuard {
    file: File,
    path: PathBuf,
}

impl LeaseGuard {
    /// Path of the locked file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the lock file, then releases the lock.
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove lease file");
            }
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "unlock failed, closing file instead");
        }
    }
}

impl LeaseRegistry {
    /// Registry rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Registry rooted at the configured lease directory.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.lease_dir())
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lock file of an operation.
    #[must_use]
    pub fn lease_path(&self, store: &StoreRef, operation_id: u64) -> PathBuf {
        self.store_dir(store).join(format!("{operation_id}.lease"))
    }

    fn store_dir(&self, store: &StoreRef) -> PathBuf {
        self.root
            .join(path_component(store.schema()))
            .join(path_component(store.store()))
    }

    /// Takes the lease of a new operation.
    ///
    /// # Errors
    ///
    /// Returns `LeaseBusy` if the lock is held elsewhere, or an I/O error.
    pub fn acquire(&self, store: &StoreRef, operation_id: u64) -> Result<LeaseGuard> {
        match self.probe(store, operation_id)? {
            ProbeOutcome::Acquired(guard) => Ok(guard),
            ProbeOutcome::Held => Err(LedgerError::LeaseBusy { operation_id }),
        }
    }

    /// Tries to lock an operation's lease file without blocking.
    ///
    /// # Errors
    ///
    /// Returns an I/O error other than lock contention.
    pub fn probe(&self, store: &StoreRef, operation_id: u64) -> Result<ProbeOutcome> {
        let path = self.lease_path(store, operation_id);
        Ok(match try_lock(&path)? {
            Some(file) => ProbeOutcome::Acquired(LeaseGuard { file, path }),
            None => ProbeOutcome::Held,
        })
    }

    /// Serializes lease recovery of one store.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryInProgress` if another recovery holds the lock, or
    /// an I/O error.
    pub fn lock_recovery(&self, store: &StoreRef) -> Result<LeaseGuard> {
        let path = self.store_dir(store).join(RECOVERY_LOCK);
        match try_lock(&path)? {
            Some(file) => Ok(LeaseGuard { file, path }),
            None => Err(LedgerError::RecoveryInProgress {
                store: store.to_string(),
            }),
        }
    }
}

fn try_lock(path: &Path) -> Result<Option<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(Some(file)),
        Err(e) if is_contended(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Percent-encodes every byte outside `[A-Za-z0-9._-]`, plus `%` itself and
/// a leading `.`, so names cannot escape the registry root and distinct
/// names never share a directory.
fn path_component(name: &str) -> String {
    use std::fmt::Write as _;

    let mut encoded = String::with_capacity(name.len());
    for (idx, byte) in name.bytes().enumerate() {
        let literal = byte.is_ascii_alphanumeric()
            || matches!(byte, b'_' | b'-')
            || (byte == b'.' && idx > 0);
        if literal {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn store() -> StoreRef {
        StoreRef::main("sales").expect("store ref")
    }

    #[test]
    fn held_lease_is_reported_busy() {
        let dir = TempDir::new().expect("temp dir");
        let registry = LeaseRegistry::new(dir.path());

        let _guard = registry.acquire(&store(), 7).expect("first acquire");
        assert!(matches!(
            registry.probe(&store(), 7).expect("probe"),
            ProbeOutcome::Held
        ));
        assert!(matches!(
            registry.acquire(&store(), 7),
            Err(LedgerError::LeaseBusy { operation_id: 7 })
        ));
    }

    #[test]
    fn dropped_guard_makes_lease_probeable() {
        let dir = TempDir::new().expect("temp dir");
        let registry = LeaseRegistry::new(dir.path());

        drop(registry.acquire(&store(), 7).expect("acquire"));
        assert!(matches!(
            registry.probe(&store(), 7).expect("probe"),
            ProbeOutcome::Acquired(_)
        ));
    }

    #[test]
    fn release_removes_the_lock_file() {
        let dir = TempDir::new().expect("temp dir");
        let registry = LeaseRegistry::new(dir.path());

        let guard = registry.acquire(&store(), 3).expect("acquire");
        let path = guard.path().to_path_buf();
        assert!(path.exists());
        guard.release();
        assert!(!path.exists());
    }

    #[test]
    fn recovery_lock_is_exclusive() {
        let dir = TempDir::new().expect("temp dir");
        let registry = LeaseRegistry::new(dir.path());

        let guard = registry.lock_recovery(&store()).expect("first recovery");
        assert!(matches!(
            registry.lock_recovery(&store()),
            Err(LedgerError::RecoveryInProgress { .. })
        ));
        drop(guard);
        assert!(registry.lock_recovery(&store()).is_ok());
    }

    #[test]
    fn path_components_are_escaped() {
        assert_eq!(path_component("sales/2024"), "sales%2F2024");
        assert_eq!(path_component(".."), "%2E.");
        assert_eq!(path_component(".hidden"), "%2Ehidden");
        assert_eq!(path_component("a.b-c_d"), "a.b-c_d");
        assert_eq!(path_component("50%"), "50%25");
        assert_eq!(path_component("zoë"), "zo%C3%AB");

        let registry = LeaseRegistry::new("/run/opledger");
        let store = StoreRef::new("../etc", "x y").expect("store ref");
        assert_eq!(
            registry.lease_path(&store, 9),
            PathBuf::from("/run/opledger/%2E.%2Fetc/x%20y/9.lease")
        );
    }

    #[test]
    fn similar_store_names_get_distinct_paths() {
        let pairs = [
            ("sales/eu", "sales_eu"),
            ("..", "__"),
            ("a b", "a_b"),
            ("a%20b", "a b"),
            (".x", "%2Ex"),
        ];
        for (left, right) in pairs {
            assert_ne!(path_component(left), path_component(right), "{left} vs {right}");
        }

        let registry = LeaseRegistry::new("/run/opledger");
        assert_ne!(
            registry.lease_path(&StoreRef::main("sales/eu").expect("ref"), 5),
            registry.lease_path(&StoreRef::main("sales_eu").expect("ref"), 5)
        );
    }

    #[test]
    fn same_operation_id_in_similar_stores_does_not_collide() {
        let dir = TempDir::new().expect("temp dir");
        let registry = LeaseRegistry::new(dir.path());
        let slashed = StoreRef::main("sales/eu").expect("ref");
        let underscored = StoreRef::main("sales_eu").expect("ref");

        let _held = registry.acquire(&slashed, 5).expect("first store");
        let other = registry.acquire(&underscored, 5).expect("second store is independent");
        assert_ne!(other.path().to_path_buf(), registry.lease_path(&slashed, 5));
    }

    proptest! {
        #[test]
        fn encoding_is_injective(left in "[a-z._/% -]{1,8}", right in "[a-z._/% -]{1,8}") {
            prop_assume!(left != right);
            prop_assert_ne!(path_component(&left), path_component(&right));
        }

        #[test]
        fn encoded_component_is_a_plain_file_name(name in "\\PC{1,12}") {
            let encoded = path_component(&name);
            prop_assert!(!encoded.contains('/'));
            prop_assert!(!encoded.starts_with('.'));
        }
    }
}
