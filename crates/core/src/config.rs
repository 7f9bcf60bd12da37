//! TOML-based configuration system for Warden.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::models::sync::RunMode;
use crate::signal::SIGNAL_RETENTION;

/// Top-level Warden configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    pub warden: WardenSection,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

/// Core instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenSection {
    pub instance_name: String,
    pub data_dir: String,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Database backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: Some("/var/lib/warden/warden.db".into()),
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection string for the configured file, created on first use.
    pub fn connect_string(&self) -> Result<String> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| WardenError::Config("warden.database.path is not set".into()))?;
        Ok(format!("sqlite:{}?mode=rwc", path))
    }
}

/// Whether one connector's failure aborts the whole pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    #[default]
    BestEffort,
    Strict,
}

/// Run cadence and failure backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
    /// Full-sync interval per connector kind, in seconds.
    #[serde(default)]
    pub intervals: BTreeMap<String, u64>,
    /// Discovery interval per connector kind, in seconds.
    #[serde(default)]
    pub discovery_intervals: BTreeMap<String, u64>,
    #[serde(default = "default_backoff_base")]
    pub failure_backoff_base_seconds: u64,
    #[serde(default = "default_backoff_max")]
    pub failure_backoff_max_seconds: u64,
    #[serde(default = "default_recent_run_cap")]
    pub recent_finished_run_cap: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            evaluation_mode: EvaluationMode::default(),
            intervals: BTreeMap::new(),
            discovery_intervals: BTreeMap::new(),
            failure_backoff_base_seconds: default_backoff_base(),
            failure_backoff_max_seconds: default_backoff_max(),
            recent_finished_run_cap: default_recent_run_cap(),
        }
    }
}

impl SyncConfig {
    pub fn intervals_for(&self, mode: RunMode) -> &BTreeMap<String, u64> {
        match mode {
            RunMode::Full => &self.intervals,
            RunMode::Discovery => &self.discovery_intervals,
        }
    }
}

fn default_backoff_base() -> u64 {
    300
}

fn default_backoff_max() -> u64 {
    6 * 60 * 60
}

fn default_recent_run_cap() -> u32 {
    10
}

/// Backing mechanism for scope locks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    Lease,
    SingleInstance,
}

/// Lock lease and heartbeat settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub mode: LockMode,
    #[serde(default = "default_lock_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Owner id written to lock rows. Generated per process when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mode: LockMode::default(),
            ttl_seconds: default_lock_ttl(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            instance_id: None,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }
}

/// Longest lease a lock row may carry.
pub const MAX_LOCK_TTL_SECONDS: u64 = 24 * 60 * 60;

fn default_lock_ttl() -> u64 {
    120
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    10
}

/// Worker loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick")]
    pub full_tick_seconds: u64,
    #[serde(default = "default_tick")]
    pub discovery_tick_seconds: u64,
    #[serde(default = "default_signal_poll")]
    pub signal_poll_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            full_tick_seconds: default_tick(),
            discovery_tick_seconds: default_tick(),
            signal_poll_seconds: default_signal_poll(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_for(&self, mode: RunMode) -> Duration {
        match mode {
            RunMode::Full => Duration::from_secs(self.full_tick_seconds),
            RunMode::Discovery => Duration::from_secs(self.discovery_tick_seconds),
        }
    }

    pub fn signal_poll(&self) -> Duration {
        Duration::from_secs(self.signal_poll_seconds)
    }
}

fn default_tick() -> u64 {
    60
}

fn default_signal_poll() -> u64 {
    5
}

/// One configured connector instance. `settings` is decoded by the
/// connector definition registered for `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub kind: String,
    pub name: String,
    #[serde(default = "default_connector_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: toml::Table,
}

fn default_connector_enabled() -> bool {
    true
}

impl WardenConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WardenError::Config(format!("failed to parse config: {e}")))
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.warden.instance_name.is_empty() {
            return Err(WardenError::Config(
                "warden.instance_name must not be empty".into(),
            ));
        }

        if self.warden.data_dir.is_empty() {
            return Err(WardenError::Config(
                "warden.data_dir must not be empty".into(),
            ));
        }

        if self.warden.database.path.is_none() {
            return Err(WardenError::Config(
                "warden.database.path is required".into(),
            ));
        }

        let sync = &self.sync;
        if sync.failure_backoff_base_seconds == 0 {
            return Err(WardenError::Config(
                "sync.failure_backoff_base_seconds must be positive".into(),
            ));
        }
        if sync.failure_backoff_base_seconds > sync.failure_backoff_max_seconds {
            return Err(WardenError::Config(
                "sync.failure_backoff_base_seconds must not exceed sync.failure_backoff_max_seconds"
                    .into(),
            ));
        }
        if sync.recent_finished_run_cap == 0 {
            return Err(WardenError::Config(
                "sync.recent_finished_run_cap must be at least 1".into(),
            ));
        }
        for (kind, secs) in sync.intervals.iter().chain(sync.discovery_intervals.iter()) {
            if *secs == 0 {
                return Err(WardenError::Config(format!(
                    "sync interval for {kind} must be positive"
                )));
            }
        }

        let lock = &self.lock;
        if lock.ttl_seconds == 0 || lock.heartbeat_interval_seconds == 0 {
            return Err(WardenError::Config(
                "lock.ttl_seconds and lock.heartbeat_interval_seconds must be positive".into(),
            ));
        }
        if lock.ttl_seconds > MAX_LOCK_TTL_SECONDS {
            return Err(WardenError::Config(format!(
                "lock.ttl_seconds must not exceed {MAX_LOCK_TTL_SECONDS}"
            )));
        }
        if lock.heartbeat_interval_seconds >= lock.ttl_seconds {
            return Err(WardenError::Config(
                "lock.heartbeat_interval_seconds must be shorter than lock.ttl_seconds".into(),
            ));
        }
        if lock.heartbeat_timeout_seconds == 0 {
            return Err(WardenError::Config(
                "lock.heartbeat_timeout_seconds must be positive".into(),
            ));
        }

        if self.scheduler.full_tick_seconds == 0
            || self.scheduler.discovery_tick_seconds == 0
            || self.scheduler.signal_poll_seconds == 0
        {
            return Err(WardenError::Config(
                "scheduler intervals must be positive".into(),
            ));
        }
        if self.scheduler.signal_poll() >= SIGNAL_RETENTION {
            return Err(WardenError::Config(format!(
                "scheduler.signal_poll_seconds must be shorter than {}s",
                SIGNAL_RETENTION.as_secs()
            )));
        }

        for connector in &self.connectors {
            if connector.kind.is_empty() {
                return Err(WardenError::Config("connector kind must not be empty".into()));
            }
            if connector.name.is_empty() {
                return Err(WardenError::Config(format!(
                    "connector of kind {} must have a name",
                    connector.kind
                )));
            }
        }

        Ok(())
    }

    /// Generate a sensible default configuration.
    pub fn generate_default() -> Self {
        let mut intervals = BTreeMap::new();
        intervals.insert("file".to_string(), 60 * 60);
        intervals.insert("static".to_string(), 24 * 60 * 60);

        let mut discovery_intervals = BTreeMap::new();
        discovery_intervals.insert("file".to_string(), 15 * 60);

        Self {
            warden: WardenSection {
                instance_name: "Warden".into(),
                data_dir: "/var/lib/warden".into(),
                database: DatabaseConfig::default(),
            },
            sync: SyncConfig {
                intervals,
                discovery_intervals,
                ..Default::default()
            },
            lock: LockConfig::default(),
            scheduler: SchedulerConfig::default(),
            connectors: Vec::new(),
        }
    }
}
