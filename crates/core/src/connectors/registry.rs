use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::ConnectorConfig;
use crate::error::{Result, WardenError};
use crate::models::sync::RunMode;

use super::{ConnectorDefinition, ConnectorSettings, FileDefinition, Integration, StaticDefinition};

/// Process-local catalog of connector definitions keyed by kind.
///
/// Built once at startup and only read afterward.
#[derive(Default)]
pub struct Registry {
    definitions: BTreeMap<String, Arc<dyn ConnectorDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every connector shipped with the core.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(FileDefinition))?;
        registry.register(Arc::new(StaticDefinition))?;
        Ok(registry)
    }

    pub fn register(&mut self, definition: Arc<dyn ConnectorDefinition>) -> Result<()> {
        let kind = definition.kind();
        if kind.trim().is_empty() {
            return Err(WardenError::Registry(
                "connector kind must not be empty".into(),
            ));
        }
        // The kind is also the run row, interval and lookup key, so it is stored as given.
        if kind.trim() != kind {
            return Err(WardenError::Registry(format!(
                "connector kind {kind:?} must not have surrounding whitespace"
            )));
        }
        if self.definitions.contains_key(kind) {
            return Err(WardenError::Registry(format!(
                "connector kind {kind:?} is already registered"
            )));
        }
        self.definitions.insert(kind.to_string(), definition);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ConnectorDefinition>> {
        self.definitions.get(kind).cloned()
    }

    /// All definitions ordered by kind.
    pub fn definitions(&self) -> Vec<Arc<dyn ConnectorDefinition>> {
        self.definitions.values().cloned().collect()
    }

    /// Decode and validate configured connectors against the registry.
    ///
    /// Disabled entries are decoded but not validated, so a half-filled
    /// entry can sit in the config file without blocking startup.
    pub fn resolve(&self, configs: &[ConnectorConfig]) -> Result<Vec<ConnectorInstance>> {
        let mut seen = BTreeSet::new();
        let mut instances = Vec::with_capacity(configs.len());

        for cfg in configs {
            let definition = self.get(&cfg.kind).ok_or_else(|| {
                WardenError::Registry(format!(
                    "unknown connector kind {:?} for {:?}",
                    cfg.kind, cfg.name
                ))
            })?;
            if !seen.insert((cfg.kind.clone(), cfg.name.clone())) {
                return Err(WardenError::Registry(format!(
                    "connector {}/{} is configured more than once",
                    cfg.kind, cfg.name
                )));
            }

            let settings = definition.decode(&cfg.settings)?;
            if cfg.enabled {
                definition.validate(&settings)?;
            }
            instances.push(ConnectorInstance {
                definition,
                name: cfg.name.clone(),
                enabled: cfg.enabled,
                settings,
            });
        }

        Ok(instances)
    }
}

/// A configured connector resolved against its definition.
#[derive(Clone)]
pub struct ConnectorInstance {
    pub definition: Arc<dyn ConnectorDefinition>,
    pub name: String,
    pub enabled: bool,
    pub settings: ConnectorSettings,
}

impl ConnectorInstance {
    pub fn kind(&self) -> &str {
        self.definition.kind()
    }

    pub fn is_configured(&self) -> bool {
        self.definition.is_configured(&self.settings)
    }

    /// Enabled, configured, and able to run in `mode`.
    pub fn is_runnable(&self, mode: RunMode) -> bool {
        self.enabled && self.is_configured() && self.definition.supports(mode)
    }

    pub fn new_integration(&self) -> Result<Box<dyn Integration>> {
        self.definition.new_integration(&self.name, &self.settings)
    }
}

impl std::fmt::Debug for ConnectorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorInstance")
            .field("kind", &self.kind())
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::IntegrationRole;
    use crate::testing::MockDefinition;

    fn connector(kind: &str, name: &str, settings: &str) -> ConnectorConfig {
        ConnectorConfig {
            kind: kind.into(),
            name: name.into(),
            enabled: true,
            settings: toml::from_str(settings).unwrap(),
        }
    }

    #[test]
    fn builtin_registers_file_and_static() {
        let registry = Registry::builtin().unwrap();
        let kinds: Vec<String> = registry
            .definitions()
            .iter()
            .map(|d| d.kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["file", "static"]);
        assert_eq!(registry.get("file").unwrap().role(), IntegrationRole::Idp);
        assert_eq!(registry.get("static").unwrap().role(), IntegrationRole::App);
        assert!(registry.get("okta").is_none());
    }

    #[test]
    fn register_rejects_duplicate_kind() {
        let mut registry = Registry::builtin().unwrap();
        let err = registry.register(Arc::new(FileDefinition)).unwrap_err();
        assert!(matches!(err, WardenError::Registry(_)));
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn register_rejects_empty_kind() {
        let mut registry = Registry::new();
        let err = registry
            .register(Arc::new(MockDefinition::new("  ")))
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn register_rejects_padded_kind() {
        let mut registry = Registry::new();
        let err = registry
            .register(Arc::new(MockDefinition::new(" okta")))
            .unwrap_err();
        assert!(err.to_string().contains("surrounding whitespace"));
        assert!(registry.get("okta").is_none());
        assert!(registry.get(" okta").is_none());

        registry.register(Arc::new(MockDefinition::new("okta"))).unwrap();
        assert_eq!(registry.get("okta").unwrap().kind(), "okta");
    }

    #[test]
    fn resolve_rejects_unknown_kind() {
        let registry = Registry::builtin().unwrap();
        let err = registry
            .resolve(&[connector("okta", "corp", "")])
            .unwrap_err();
        assert!(err.to_string().contains("unknown connector kind"));
    }

    #[test]
    fn resolve_rejects_duplicate_instance() {
        let registry = Registry::builtin().unwrap();
        let err = registry
            .resolve(&[
                connector("file", "hr", "path = \"/tmp/a.json\""),
                connector("file", "hr", "path = \"/tmp/b.json\""),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn resolve_validates_only_enabled_entries() {
        let registry = Registry::builtin().unwrap();
        let mut disabled = connector("file", "draft", "path = \"\"");
        disabled.enabled = false;
        let instances = registry.resolve(&[disabled]).unwrap();
        assert_eq!(instances.len(), 1);
        assert!(!instances[0].is_runnable(RunMode::Full));

        let err = registry
            .resolve(&[connector("file", "live", "path = \"\"")])
            .unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn resolved_instance_respects_supported_modes() {
        let registry = Registry::builtin().unwrap();
        let instances = registry
            .resolve(&[
                connector("file", "hr", "path = \"/tmp/hr.json\""),
                connector(
                    "static",
                    "breakglass",
                    "identities = [{ external_id = \"root\" }]",
                ),
            ])
            .unwrap();
        assert!(instances[0].is_runnable(RunMode::Discovery));
        assert!(instances[1].is_runnable(RunMode::Full));
        assert!(!instances[1].is_runnable(RunMode::Discovery));
        let integration = instances[0].new_integration().unwrap();
        assert_eq!(integration.kind(), "file");
        assert_eq!(integration.name(), "hr");
    }
}
