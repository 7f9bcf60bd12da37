use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a sync run. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Succeeded,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }
}

/// Classification recorded on a failed run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Api,
    Db,
    LockLost,
    Canceled,
    Other,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Api => "api",
            SyncErrorKind::Db => "db",
            SyncErrorKind::LockLost => "lock_lost",
            SyncErrorKind::Canceled => "canceled",
            SyncErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which class of connectors a pass targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Full,
    Discovery,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Discovery => "discovery",
        }
    }

    /// Lock scope guarding this lane.
    pub fn lock_scope(&self) -> &'static str {
        match self {
            RunMode::Full => "sync:full",
            RunMode::Discovery => "sync:discovery",
        }
    }

    /// Store channel carrying manual resync requests for this lane.
    pub fn signal_channel(&self) -> &'static str {
        match self {
            RunMode::Full => "warden_resync_full",
            RunMode::Discovery => "warden_resync_discovery",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" => Ok(RunMode::Full),
            "discovery" => Ok(RunMode::Discovery),
            other => Err(format!("unknown run mode: {other} (expected full or discovery)")),
        }
    }
}

/// A record of a single connector sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: String,
    pub source_kind: String,
    pub source_name: String,
    pub mode: RunMode,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SyncErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub rows_written: i64,
    pub rows_expired: i64,
}

/// The slice of a finished run the run policy looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedRun {
    pub status: SyncStatus,
    pub finished_at: DateTime<Utc>,
}

impl FinishedRun {
    pub fn succeeded(finished_at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Succeeded,
            finished_at,
        }
    }

    pub fn failed(finished_at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Failed,
            finished_at,
        }
    }
}
