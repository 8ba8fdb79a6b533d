//! Record types of the operation ledger.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Message code of detail lines attached to a successful operation.
pub const SUCCESS_DETAIL_CODE: u32 = 99_998;

/// Message code of error detail lines derived from a failure.
pub const ERROR_DETAIL_CODE: u32 = 99_999;

/// Lifecycle status of an operation.
///
/// `Running` is initial; `Finished` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Opened and held by a process.
    Running,
    /// Completed successfully.
    Finished,
    /// Completed with an error, or reclaimed by lease recovery.
    Failed,
}

impl OperationStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    /// Returns `true` for `Finished` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Finished | Self::Failed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            other => Err(LedgerError::invalid(
                "status",
                format!("unknown operation status '{other}'"),
            )),
        }
    }
}

/// Kind of administrative operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Write of a load request into the ingestion buffer.
    Load,
    /// Merge of load requests into the active snapshot.
    Activate,
    /// Reversal of activations.
    Rollback,
    /// Deletion of active rows matching a filter.
    DeleteWithFilter,
    /// Deletion of load requests from the ingestion buffer.
    DeleteRequests,
    /// Deletion of all store content.
    DeleteAll,
    /// Removal of change log entries.
    CleanupChangelog,
    /// Retention cleanup of ledger records.
    CleanupMetadata,
    /// Consistency check of the store's content hashes.
    CheckConsistency,
    /// Lease recovery.
    Repair,
    /// Caller-defined kind.
    Custom(String),
}

impl OperationKind {
    /// Stored representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Load => "LOAD",
            Self::Activate => "ACTIVATE",
            Self::Rollback => "ROLLBACK",
            Self::DeleteWithFilter => "DELETE_WITH_FILTER",
            Self::DeleteRequests => "DELETE_REQUEST",
            Self::DeleteAll => "DELETE_ALL",
            Self::CleanupChangelog => "CLEANUP_CHANGELOG",
            Self::CleanupMetadata => "CLEANUP_METADATA",
            Self::CheckConsistency => "CHECK_CONSISTENCY",
            Self::Repair => "REPAIR",
            Self::Custom(name) => name,
        }
    }

    /// Whether a successful operation of this kind may change the active
    /// snapshot.
    #[must_use]
    pub const fn changes_active(&self) -> bool {
        matches!(self, Self::Activate | Self::Rollback | Self::DeleteWithFilter)
    }

    /// Whether a successful operation of this kind may change the change log.
    #[must_use]
    pub const fn changes_change_log(&self) -> bool {
        self.changes_active() || matches!(self, Self::CleanupChangelog)
    }

    /// Base of the kind's message code range.
    const fn code_base(&self) -> u32 {
        match self {
            Self::Load => 1_000,
            Self::Activate => 2_000,
            Self::DeleteRequests => 3_000,
            Self::Rollback => 4_000,
            Self::CleanupMetadata => 6_000,
            Self::CheckConsistency => 7_000,
            Self::CleanupChangelog => 8_000,
            Self::DeleteAll => 9_000,
            Self::Repair => 13_000,
            Self::DeleteWithFilter => 14_000,
            Self::Custom(_) => 90_000,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Load => "Load".to_string(),
            Self::Activate => "Activation".to_string(),
            Self::Rollback => "Rollback".to_string(),
            Self::DeleteWithFilter => "Deletion with filter".to_string(),
            Self::DeleteRequests => "Deletion".to_string(),
            Self::DeleteAll => "Delete-all".to_string(),
            Self::CleanupChangelog => "Cleanup of change log".to_string(),
            Self::CleanupMetadata => "Cleanup of metadata".to_string(),
            Self::CheckConsistency => "Check of consistency".to_string(),
            Self::Repair => "Repair of running operations".to_string(),
            Self::Custom(name) => name.clone(),
        }
    }

    /// Start message with the given detail, e.g. `Start of Activation: [3,4]`.
    #[must_use]
    pub fn start_message(&self, detail: &str) -> Message {
        let text = if detail.is_empty() {
            format!("Start of {}", self.label())
        } else {
            format!("Start of {}: {detail}", self.label())
        };
        Message::info(self.code_base() + 1, text)
    }

    /// Fixed message closing a successful operation.
    #[must_use]
    pub fn success_message(&self) -> Message {
        Message::success(
            self.code_base() + 2,
            format!("{} finished successfully", self.label()),
        )
    }

    /// Fixed message closing a failed operation, e.g. `Load failed`.
    #[must_use]
    pub fn failure_message(&self) -> Message {
        Message::error(self.code_base() + 3, format!("{} failed", self.label()))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "LOAD" => Self::Load,
            "ACTIVATE" => Self::Activate,
            "ROLLBACK" => Self::Rollback,
            "DELETE_WITH_FILTER" => Self::DeleteWithFilter,
            "DELETE_REQUEST" => Self::DeleteRequests,
            "DELETE_ALL" => Self::DeleteAll,
            "CLEANUP_CHANGELOG" => Self::CleanupChangelog,
            "CLEANUP_METADATA" => Self::CleanupMetadata,
            "CHECK_CONSISTENCY" => Self::CheckConsistency,
            "REPAIR" => Self::Repair,
            "" => return Err(LedgerError::invalid("kind", "no operation kind provided")),
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational.
    Info,
    /// Successful completion.
    Success,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

impl Severity {
    /// One-letter stored code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Info => "I",
            Self::Success => "S",
            Self::Warn => "W",
            Self::Error => "E",
        }
    }

    /// Parses the stored code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown code.
    pub fn from_code(code: &str) -> Result<Self, LedgerError> {
        match code {
            "I" => Ok(Self::Info),
            "S" => Ok(Self::Success),
            "W" => Ok(Self::Warn),
            "E" => Ok(Self::Error),
            other => Err(LedgerError::invalid(
                "severity",
                format!("unknown severity code '{other}'"),
            )),
        }
    }
}

/// A message to be appended to an operation's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Severity.
    pub severity: Severity,
    /// Numeric message code.
    pub code: u32,
    /// Message text.
    pub text: String,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(severity: Severity, code: u32, text: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            text: text.into(),
        }
    }

    /// Informational message.
    #[must_use]
    pub fn info(code: u32, text: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, text)
    }

    /// Success message.
    #[must_use]
    pub fn success(code: u32, text: impl Into<String>) -> Self {
        Self::new(Severity::Success, code, text)
    }

    /// Warning message.
    #[must_use]
    pub fn warn(code: u32, text: impl Into<String>) -> Self {
        Self::new(Severity::Warn, code, text)
    }

    /// Error message.
    #[must_use]
    pub fn error(code: u32, text: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, text)
    }
}

/// A persisted log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Owning operation.
    pub operation_id: u64,
    /// Dense per-operation sequence number, starting at 0.
    pub seq_no: u64,
    /// Unix milliseconds at which the entry was written.
    pub logged_at: i64,
    /// The message.
    #[serde(flatten)]
    pub message: Message,
}

/// A persisted operation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    /// Operation id.
    pub operation_id: u64,
    /// Operation kind, as stored.
    pub kind: String,
    /// Lifecycle status.
    pub status: OperationStatus,
    /// Who opened the operation.
    pub owner: String,
    /// Unix milliseconds of `open`.
    pub started_at: i64,
    /// Unix milliseconds of the last change.
    pub last_updated_at: i64,
    /// Operation parameters; `Null` if never set.
    pub details: serde_json::Value,
    /// Active snapshot hash recorded by this operation; empty if none.
    pub checksum_active: String,
    /// Change log hash recorded by this operation; empty if none.
    pub checksum_changelog: String,
}

/// Final outcome passed to [`OperationLedger::close`](super::OperationLedger::close).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Commit the main unit of work and mark the operation `FINISHED`.
    Finished,
    /// Roll back the main unit of work and durably mark the operation
    /// `FAILED`.
    Failed,
}

impl Outcome {
    /// The status the outcome leads to.
    #[must_use]
    pub const fn status(self) -> OperationStatus {
        match self {
            Self::Finished => OperationStatus::Finished,
            Self::Failed => OperationStatus::Failed,
        }
    }
}
