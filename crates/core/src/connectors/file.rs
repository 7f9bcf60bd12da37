//! `file` connector: ingests a JSON identity export from disk.
//!
//! The export carries two arrays, `identities` and `entitlements`. Discovery
//! passes read only the identities.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RunContext;
use crate::error::{Result, WardenError};
use crate::models::identity::{EntitlementRecord, IdentityRecord};
use crate::models::sync::RunMode;
use crate::reporter::Event;

use super::{
    decode_settings, ConnectorDefinition, ConnectorSettings, Integration, IntegrationRole, RunDeps,
};

pub const KIND: &str = "file";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileSettings {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
struct Export {
    #[serde(default)]
    identities: Vec<IdentityRecord>,
    #[serde(default)]
    entitlements: Vec<EntitlementRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileDefinition;

fn settings_of(settings: &ConnectorSettings) -> Result<&FileSettings> {
    match settings {
        ConnectorSettings::File(s) => Ok(s),
        other => Err(WardenError::Config(format!(
            "file connector given foreign settings: {other:?}"
        ))),
    }
}

impl ConnectorDefinition for FileDefinition {
    fn kind(&self) -> &str {
        KIND
    }

    fn display_name(&self) -> &str {
        "JSON export file"
    }

    fn role(&self) -> IntegrationRole {
        IntegrationRole::Idp
    }

    fn supports(&self, _mode: RunMode) -> bool {
        true
    }

    fn decode(&self, raw: &toml::Table) -> Result<ConnectorSettings> {
        decode_settings::<FileSettings>(KIND, raw).map(ConnectorSettings::File)
    }

    fn validate(&self, settings: &ConnectorSettings) -> Result<()> {
        let s = settings_of(settings)?;
        if s.path.trim().is_empty() {
            return Err(WardenError::Config(
                "file connector requires a non-empty path".into(),
            ));
        }
        Ok(())
    }

    fn is_configured(&self, settings: &ConnectorSettings) -> bool {
        settings_of(settings)
            .map(|s| !s.path.trim().is_empty())
            .unwrap_or(false)
    }

    fn new_integration(
        &self,
        name: &str,
        settings: &ConnectorSettings,
    ) -> Result<Box<dyn Integration>> {
        let s = settings_of(settings)?;
        Ok(Box::new(FileIntegration {
            name: name.to_string(),
            path: PathBuf::from(&s.path),
        }))
    }
}

pub struct FileIntegration {
    name: String,
    path: PathBuf,
}

impl FileIntegration {
    async fn load(&self) -> Result<Export> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            WardenError::Api(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let export: Export = serde_json::from_str(&raw).map_err(|e| {
            WardenError::Api(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        if let Some(bad) = export.identities.iter().position(|i| i.external_id.is_empty()) {
            return Err(WardenError::Api(format!(
                "identity #{bad} in {} has an empty external_id",
                self.path.display()
            )));
        }
        if let Some(bad) = export.entitlements.iter().position(|e| e.external_id.is_empty()) {
            return Err(WardenError::Api(format!(
                "entitlement #{bad} in {} has an empty external_id",
                self.path.display()
            )));
        }
        Ok(export)
    }
}

#[async_trait]
impl Integration for FileIntegration {
    fn kind(&self) -> &str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> IntegrationRole {
        IntegrationRole::Idp
    }

    fn init_events(&self) -> Vec<Event> {
        let source = format!("{KIND}/{}", self.name);
        vec![
            Event::stage(source.clone(), "identities"),
            Event::stage(source, "entitlements"),
        ]
    }

    async fn run(&self, ctx: &RunContext, deps: &RunDeps) -> Result<()> {
        let export = self.load().await?;
        let source = deps.source();
        debug!(
            path = %self.path.display(),
            identities = export.identities.len(),
            entitlements = export.entitlements.len(),
            "Loaded export"
        );

        let total = export.identities.len() as i64;
        let written = deps.write_identities(&export.identities).await?;
        deps.report(Event::stage(source.clone(), "identities").progress(written as i64, total));

        if deps.mode() == RunMode::Discovery || ctx.is_cancelled() {
            return Ok(());
        }

        let total = export.entitlements.len() as i64;
        let written = deps.write_entitlements(&export.entitlements).await?;
        deps.report(Event::stage(source, "entitlements").progress(written as i64, total));
        Ok(())
    }
}
