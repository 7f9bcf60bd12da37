//! Connector contract: definitions, settings and the runnable `Integration`.

pub mod file;
pub mod registry;
pub mod static_list;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::db::repository::{EntitlementRepository, IdentityRepository, WardenRepository};
use crate::error::{Result, WardenError};
use crate::models::identity::{EntitlementRecord, IdentityRecord};
use crate::models::sync::{RunMode, SyncRun};
use crate::reporter::{Event, Reporter};

pub use file::{FileDefinition, FileSettings};
pub use registry::{ConnectorInstance, Registry};
pub use static_list::{StaticDefinition, StaticSettings};

/// Identity rows written per upsert transaction.
pub const IDENTITY_BATCH_SIZE: usize = 1_000;

/// Entitlement rows written per upsert transaction.
pub const ENTITLEMENT_BATCH_SIZE: usize = 5_000;

/// Whether a connector is an identity provider or a downstream application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationRole {
    Idp,
    App,
}

impl IntegrationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationRole::Idp => "idp",
            IntegrationRole::App => "app",
        }
    }
}

impl fmt::Display for IntegrationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded settings, one variant per built-in connector kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorSettings {
    File(FileSettings),
    Static(StaticSettings),
}

/// Decode a raw TOML settings table into a typed settings struct.
pub fn decode_settings<T: DeserializeOwned>(kind: &str, raw: &toml::Table) -> Result<T> {
    toml::Value::Table(raw.clone())
        .try_into::<T>()
        .map_err(|e| WardenError::Config(format!("invalid settings for {kind} connector: {e}")))
}

/// Everything the registry needs to know about one connector kind.
pub trait ConnectorDefinition: Send + Sync {
    fn kind(&self) -> &str;
    fn display_name(&self) -> &str;
    fn role(&self) -> IntegrationRole;
    fn supports(&self, mode: RunMode) -> bool;
    fn decode(&self, raw: &toml::Table) -> Result<ConnectorSettings>;
    fn validate(&self, settings: &ConnectorSettings) -> Result<()>;
    fn is_configured(&self, settings: &ConnectorSettings) -> bool;
    fn new_integration(
        &self,
        name: &str,
        settings: &ConnectorSettings,
    ) -> Result<Box<dyn Integration>>;
}

/// A runnable connector instance.
#[async_trait]
pub trait Integration: Send + Sync {
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    fn role(&self) -> IntegrationRole;
    /// Stages this integration reports before its first progress update.
    fn init_events(&self) -> Vec<Event>;
    /// Pull from the source and write through `deps`. Should return promptly
    /// once `ctx` is canceled.
    async fn run(&self, ctx: &RunContext, deps: &RunDeps) -> Result<()>;
}

/// Write access and progress reporting for one run, scoped to its
/// (kind, name) and stamped with its run id.
pub struct RunDeps {
    repo: Arc<dyn WardenRepository>,
    reporter: Arc<dyn Reporter>,
    run_id: String,
    kind: String,
    name: String,
    mode: RunMode,
    rows_written: AtomicI64,
}

impl RunDeps {
    pub fn new(repo: Arc<dyn WardenRepository>, reporter: Arc<dyn Reporter>, run: &SyncRun) -> Self {
        Self {
            repo,
            reporter,
            run_id: run.id.clone(),
            kind: run.source_kind.clone(),
            name: run.source_name.clone(),
            mode: run.mode,
            rows_written: AtomicI64::new(0),
        }
    }

    pub fn repo(&self) -> &dyn WardenRepository {
        self.repo.as_ref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// "kind/name", used as the event source.
    pub fn source(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    pub fn report(&self, event: Event) {
        self.reporter.report(&event);
    }

    pub fn rows_written(&self) -> i64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub async fn write_identities(&self, rows: &[IdentityRecord]) -> Result<u64> {
        let mut written = 0;
        for batch in rows.chunks(IDENTITY_BATCH_SIZE) {
            written += self
                .repo
                .upsert_identities(&self.kind, &self.name, self.mode, &self.run_id, batch)
                .await?;
        }
        self.rows_written.fetch_add(written as i64, Ordering::Relaxed);
        Ok(written)
    }

    pub async fn write_entitlements(&self, rows: &[EntitlementRecord]) -> Result<u64> {
        let mut written = 0;
        for batch in rows.chunks(ENTITLEMENT_BATCH_SIZE) {
            written += self
                .repo
                .upsert_entitlements(&self.kind, &self.name, self.mode, &self.run_id, batch)
                .await?;
        }
        self.rows_written.fetch_add(written as i64, Ordering::Relaxed);
        Ok(written)
    }
}
