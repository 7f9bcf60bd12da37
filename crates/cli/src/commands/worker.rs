use std::sync::Arc;

use tracing::{error, info};
use warden_core::metrics::SyncMetrics;
use warden_core::models::sync::RunMode;
use warden_core::scheduler::{trigger_channel, Scheduler};
use warden_core::signal::ResyncListener;

use super::{build_lane, load_config, lock_manager, open_repo, shutdown_context};

/// Run the `worker` command: schedule both lanes until Ctrl-C.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repo(&config).await?;
    let lock = lock_manager(&config, repo.clone());
    let metrics = Arc::new(SyncMetrics::new());
    let ctx = shutdown_context();

    let mut handles = Vec::new();
    for mode in [RunMode::Full, RunMode::Discovery] {
        let lane = build_lane(&config, repo.clone(), lock.clone(), metrics.clone(), mode)?;
        let (trigger, mailbox) = trigger_channel();

        let listener = ResyncListener::subscribe(
            repo.clone(),
            mode,
            trigger,
            config.scheduler.signal_poll(),
        )
        .await?;
        handles.push(tokio::spawn(listener.run(ctx.clone())));

        let scheduler = Scheduler::new(
            mode.as_str(),
            lane.runner,
            config.scheduler.tick_for(mode),
            mailbox,
        );
        handles.push(tokio::spawn(scheduler.run(ctx.clone())));
    }

    println!("Warden worker running. Press Ctrl-C to stop.");
    info!(instance = %config.warden.instance_name, "Worker started");

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {e}");
        }
    }

    for (key, stats) in metrics.snapshot() {
        info!(
            kind = %key.kind,
            name = %key.name,
            mode = %key.mode,
            succeeded = stats.runs_succeeded,
            failed = stats.runs_failed,
            "Connector totals"
        );
    }
    info!("Worker shut down gracefully");
    Ok(())
}
