use std::path::Path;

use tracing::info;
use warden_core::config::{ConnectorConfig, DatabaseConfig, WardenConfig};
use warden_core::db::DatabasePool;

/// Run the `init` command: create the data directory, write a default config,
/// and set up the database.
pub async fn run(data_dir: &str) -> anyhow::Result<()> {
    let data_path = Path::new(data_dir);

    if !data_path.exists() {
        std::fs::create_dir_all(data_path)?;
        info!("Created data directory: {}", data_dir);
    }

    let config_path = data_path.join("warden.toml");
    if config_path.exists() {
        anyhow::bail!(
            "{} already exists; remove it first to re-initialize",
            config_path.display()
        );
    }

    let db_path = data_path.join("warden.db");
    let db_path_str = db_path.to_string_lossy().to_string();
    let export_path = data_path.join("export.json");

    let mut config = WardenConfig::generate_default();
    config.warden.data_dir = data_dir.to_string();
    config.warden.database = DatabaseConfig {
        path: Some(db_path_str.clone()),
    };

    // Disabled until an export is dropped at the path.
    let mut settings = toml::Table::new();
    settings.insert(
        "path".into(),
        toml::Value::String(export_path.to_string_lossy().to_string()),
    );
    config.connectors.push(ConnectorConfig {
        kind: "file".into(),
        name: "example".into(),
        enabled: false,
        settings,
    });

    let toml_str = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, &toml_str)?;
    info!("Wrote configuration to {}", config_path.display());

    DatabasePool::new_sqlite(&config.warden.database.connect_string()?).await?;
    info!("Database initialized at {}", db_path_str);

    println!("Warden initialized successfully!");
    println!("  Data directory: {}", data_dir);
    println!("  Configuration:  {}", config_path.display());
    println!("  Database:       {}", db_path_str);
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} to add connectors and their intervals",
        config_path.display()
    );
    println!("  2. Run `warden sync` for a one-off pass");
    println!("  3. Run `warden worker` to keep connectors on schedule");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::connectors::Registry;

    #[tokio::test]
    async fn init_creates_files_in_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("warden").to_string_lossy().to_string();
        run(&data_dir).await.unwrap();

        let config_path = Path::new(&data_dir).join("warden.toml");
        let config = WardenConfig::load(&config_path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.warden.data_dir, data_dir);
        assert_eq!(config.connectors.len(), 1);
        assert!(!config.connectors[0].enabled);
        assert_eq!(config.sync.intervals.get("file"), Some(&3600));

        // The example connector resolves against the built-in registry.
        let resolved = Registry::builtin()
            .unwrap()
            .resolve(&config.connectors)
            .unwrap();
        assert_eq!(resolved[0].kind(), "file");

        assert!(Path::new(&data_dir).join("warden.db").exists());
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        run(&data_dir).await.unwrap();
        let err = run(&data_dir).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
