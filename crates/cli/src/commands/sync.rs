use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use warden_core::metrics::SyncMetrics;
use warden_core::models::sync::RunMode;
use warden_core::runner::RunOnce;

use super::{build_lane, load_config, lock_manager, open_repo, shutdown_context};

/// Run the `sync` command: one locked pass over every due connector.
pub async fn run(config_path: &str, mode: RunMode) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repo(&config).await?;
    let lock = lock_manager(&config, repo.clone());
    let metrics = Arc::new(SyncMetrics::new());
    let lane = build_lane(&config, repo, lock, metrics.clone(), mode)?;

    let ctx = shutdown_context();
    let start = Instant::now();
    info!(mode = %lane.mode, scope = lane.runner.scope(), "Starting sync pass");
    let result = lane.runner.run_once(&ctx).await;

    let snapshot = metrics.snapshot();
    if snapshot.is_empty() {
        println!("No connectors ran ({mode} mode).");
    } else {
        println!("Sync pass ({mode} mode)");
        println!("---------");
        for (key, stats) in &snapshot {
            let outcome = if stats.runs_failed > 0 {
                format!(
                    "failed ({})",
                    stats
                        .last_error_kind
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "other".into())
                )
            } else {
                format!("ok, {} expired", stats.rows_expired_total)
            };
            println!("  {}/{}: {outcome}", key.kind, key.name);
        }
    }
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());

    result?;
    Ok(())
}
