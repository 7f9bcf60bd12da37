use warden_core::models::sync::RunMode;
use warden_core::signal::publish_resync;

use super::{load_config, open_repo};

/// Run the `resync` command: ask running workers for an immediate pass.
pub async fn run(config_path: &str, mode: RunMode) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repo(&config).await?;
    let id = publish_resync(repo.as_ref(), mode).await?;
    println!(
        "Resync requested on {} (signal #{id}). Workers pick it up within {}s.",
        mode.signal_channel(),
        config.scheduler.signal_poll_seconds
    );
    Ok(())
}
