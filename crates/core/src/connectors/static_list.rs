//! `static` connector: accounts and grants listed inline in the config file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{Result, WardenError};
use crate::models::identity::{EntitlementRecord, IdentityRecord};
use crate::models::sync::RunMode;
use crate::reporter::Event;

use super::{
    decode_settings, ConnectorDefinition, ConnectorSettings, Integration, IntegrationRole, RunDeps,
};

pub const KIND: &str = "static";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticSettings {
    #[serde(default)]
    pub identities: Vec<IdentityRecord>,
    #[serde(default)]
    pub entitlements: Vec<EntitlementRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDefinition;

fn settings_of(settings: &ConnectorSettings) -> Result<&StaticSettings> {
    match settings {
        ConnectorSettings::Static(s) => Ok(s),
        other => Err(WardenError::Config(format!(
            "static connector given foreign settings: {other:?}"
        ))),
    }
}

impl ConnectorDefinition for StaticDefinition {
    fn kind(&self) -> &str {
        KIND
    }

    fn display_name(&self) -> &str {
        "Static account list"
    }

    fn role(&self) -> IntegrationRole {
        IntegrationRole::App
    }

    fn supports(&self, mode: RunMode) -> bool {
        mode == RunMode::Full
    }

    fn decode(&self, raw: &toml::Table) -> Result<ConnectorSettings> {
        decode_settings::<StaticSettings>(KIND, raw).map(ConnectorSettings::Static)
    }

    fn validate(&self, settings: &ConnectorSettings) -> Result<()> {
        let s = settings_of(settings)?;
        for identity in &s.identities {
            if identity.external_id.trim().is_empty() {
                return Err(WardenError::Config(
                    "static connector identity is missing external_id".into(),
                ));
            }
        }
        for grant in &s.entitlements {
            if grant.external_id.trim().is_empty() {
                return Err(WardenError::Config(
                    "static connector entitlement is missing external_id".into(),
                ));
            }
            if !s
                .identities
                .iter()
                .any(|i| i.external_id == grant.identity_external_id)
            {
                return Err(WardenError::Config(format!(
                    "static entitlement {} references unknown identity {}",
                    grant.external_id, grant.identity_external_id
                )));
            }
        }
        Ok(())
    }

    fn is_configured(&self, settings: &ConnectorSettings) -> bool {
        settings_of(settings)
            .map(|s| !s.identities.is_empty())
            .unwrap_or(false)
    }

    fn new_integration(
        &self,
        name: &str,
        settings: &ConnectorSettings,
    ) -> Result<Box<dyn Integration>> {
        let s = settings_of(settings)?;
        Ok(Box::new(StaticIntegration {
            name: name.to_string(),
            settings: s.clone(),
        }))
    }
}

pub struct StaticIntegration {
    name: String,
    settings: StaticSettings,
}

#[async_trait]
impl Integration for StaticIntegration {
    fn kind(&self) -> &str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> IntegrationRole {
        IntegrationRole::App
    }

    fn init_events(&self) -> Vec<Event> {
        vec![Event::stage(format!("{KIND}/{}", self.name), "accounts")
            .progress(0, self.settings.identities.len() as i64)]
    }

    async fn run(&self, _ctx: &RunContext, deps: &RunDeps) -> Result<()> {
        let total = self.settings.identities.len() as i64;
        let written = deps.write_identities(&self.settings.identities).await?;
        deps.write_entitlements(&self.settings.entitlements).await?;
        deps.report(
            Event::stage(deps.source(), "accounts")
                .progress(written as i64, total)
                .with_message(format!("{} grants", self.settings.entitlements.len())),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{EntitlementRepository, IdentityRepository, SyncRunRepository};
    use crate::testing::{memory_repo, MemoryReporter};
    use std::sync::Arc;

    const SETTINGS: &str = r#"
        identities = [
            { external_id = "root", email = "root@example.com" },
            { external_id = "ops" },
        ]
        entitlements = [
            { external_id = "g1", identity_external_id = "root", resource = "console", permission = "owner" },
        ]
    "#;

    fn decoded(raw: &str) -> ConnectorSettings {
        let table: toml::Table = toml::from_str(raw).unwrap();
        StaticDefinition.decode(&table).unwrap()
    }

    #[test]
    fn decodes_inline_accounts() {
        let ConnectorSettings::Static(s) = decoded(SETTINGS) else {
            panic!("expected static settings");
        };
        assert_eq!(s.identities.len(), 2);
        assert_eq!(s.identities[1].status, "active");
        assert_eq!(s.entitlements[0].permission, "owner");
        assert!(StaticDefinition.is_configured(&ConnectorSettings::Static(s)));
    }

    #[test]
    fn empty_list_is_not_configured() {
        let settings = decoded("");
        assert!(StaticDefinition.validate(&settings).is_ok());
        assert!(!StaticDefinition.is_configured(&settings));
    }

    #[test]
    fn validate_rejects_dangling_grant() {
        let settings = decoded(
            r#"
            identities = [{ external_id = "root" }]
            entitlements = [{ external_id = "g1", identity_external_id = "ghost", resource = "x", permission = "y" }]
            "#,
        );
        let err = StaticDefinition.validate(&settings).unwrap_err();
        assert!(err.to_string().contains("unknown identity ghost"));
    }

    #[test]
    fn full_mode_only() {
        assert!(StaticDefinition.supports(RunMode::Full));
        assert!(!StaticDefinition.supports(RunMode::Discovery));
    }

    #[tokio::test]
    async fn run_writes_inline_rows() {
        let repo = memory_repo().await;
        let run = repo.create_sync_run(KIND, "breakglass", RunMode::Full).await.unwrap();
        let deps = RunDeps::new(repo.clone(), Arc::new(MemoryReporter::default()), &run);
        let integration = StaticDefinition
            .new_integration("breakglass", &decoded(SETTINGS))
            .unwrap();

        assert_eq!(integration.init_events()[0].total, 2);
        integration.run(&RunContext::new(), &deps).await.unwrap();

        assert_eq!(repo.list_identities(KIND, "breakglass").await.unwrap().len(), 2);
        assert_eq!(repo.list_entitlements(KIND, "breakglass").await.unwrap().len(), 1);
        assert_eq!(deps.rows_written(), 3);
    }
}
