//! Configuration parsing and management.
//!
//! The ledger is configured through a small TOML file naming the database
//! that holds the stores, the directory used for lease lock files, and the
//! timing parameters of lease recovery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Path of the `SQLite` database holding the stores.
    pub database_path: PathBuf,

    /// Directory for lease lock files.
    ///
    /// Defaults to a `leases` directory next to the database.
    #[serde(default)]
    pub lease_dir: Option<PathBuf>,

    /// How long a connection waits for a competing writer, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Minimum age of a RUNNING operation before lease recovery may treat it
    /// as abandoned, in seconds.
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    /// Owner recorded on operations opened through this configuration.
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Retention settings for ledger cleanup.
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Retention settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Terminal operations older than this many days are eligible for cleanup.
    #[serde(default = "default_retention_max_age_days")]
    pub max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_retention_max_age_days(),
        }
    }
}

impl LedgerConfig {
    /// Creates a configuration for `database_path` with default settings.
    #[must_use]
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            lease_dir: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            grace_window_secs: default_grace_window_secs(),
            owner: default_owner(),
            retention: RetentionConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "database_path must not be empty".to_string(),
            ));
        }
        if self.grace_window_secs == 0 {
            return Err(ConfigError::Validation(
                "grace_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.owner.trim().is_empty() {
            return Err(ConfigError::Validation("owner must not be empty".to_string()));
        }
        Ok(())
    }

    /// Directory holding lease lock files.
    #[must_use]
    pub fn lease_dir(&self) -> PathBuf {
        self.lease_dir.clone().unwrap_or_else(|| {
            self.database_path
                .parent()
                .map_or_else(|| PathBuf::from("leases"), |dir| dir.join("leases"))
        })
    }

    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Grace window as a [`Duration`].
    #[must_use]
    pub const fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_grace_window_secs() -> u64 {
    10
}

const fn default_retention_max_age_days() -> u32 {
    30
}

fn default_owner() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "opledger".to_string())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = LedgerConfig::from_toml(r#"database_path = "/var/lib/opledger/stores.db""#)
            .unwrap();

        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/opledger/stores.db")
        );
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.grace_window_secs, 10);
        assert_eq!(config.retention.max_age_days, 30);
        assert_eq!(config.lease_dir(), PathBuf::from("/var/lib/opledger/leases"));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            database_path = "/data/stores.db"
            lease_dir = "/run/opledger"
            busy_timeout_ms = 250
            grace_window_secs = 30
            owner = "loader"

            [retention]
            max_age_days = 7
        "#;

        let config = LedgerConfig::from_toml(toml).unwrap();
        assert_eq!(config.lease_dir(), PathBuf::from("/run/opledger"));
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.grace_window(), Duration::from_secs(30));
        assert_eq!(config.owner, "loader");
        assert_eq!(config.retention.max_age_days, 7);
    }

    #[test]
    fn zero_grace_window_is_rejected() {
        let toml = r#"
            database_path = "/data/stores.db"
            grace_window_secs = 0
        "#;

        match LedgerConfig::from_toml(toml).unwrap_err() {
            ConfigError::Validation(msg) => assert!(msg.contains("grace_window_secs")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = r#"
            database_path = "/data/stores.db"
            grace_window = 5
        "#;

        assert!(matches!(
            LedgerConfig::from_toml(toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let mut config = LedgerConfig::new("/data/stores.db");
        config.owner = "activator".to_string();

        let text = config.to_toml().unwrap();
        assert_eq!(LedgerConfig::from_toml(&text).unwrap(), config);
    }
}
