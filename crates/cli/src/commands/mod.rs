pub mod init;
pub mod resync;
pub mod status;
pub mod sync;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use warden_core::config::WardenConfig;
use warden_core::connectors::Registry;
use warden_core::context::{CancelReason, RunContext};
use warden_core::db::repository::WardenRepository;
use warden_core::db::sqlite::SqliteRepository;
use warden_core::db::DatabasePool;
use warden_core::lock::{build_lock_manager, generate_instance_id, LockManager};
use warden_core::lock_runner::BlockingRunOnceLockRunner;
use warden_core::metrics::SyncMetrics;
use warden_core::models::sync::RunMode;
use warden_core::policy::RunPolicy;
use warden_core::reporter::LogReporter;
use warden_core::runner::DbRunner;

pub fn load_config(config_path: &str) -> anyhow::Result<WardenConfig> {
    let config = WardenConfig::load(Path::new(config_path))?;
    config.validate()?;
    info!("Loaded configuration from {}", config_path);
    Ok(config)
}

pub async fn open_repo(config: &WardenConfig) -> anyhow::Result<Arc<SqliteRepository>> {
    let connect_str = config.warden.database.connect_string()?;
    let pool = DatabasePool::new_sqlite(&connect_str).await?;
    info!("Connected to database");
    Ok(Arc::new(SqliteRepository::new(pool.into_sqlite())))
}

/// Owner id for lock rows: configured, or generated per process.
pub fn instance_id(config: &WardenConfig) -> String {
    config
        .lock
        .instance_id
        .clone()
        .unwrap_or_else(|| generate_instance_id(&config.warden.instance_name.replace(' ', "-")))
}

/// Everything one run mode lane needs, wired from config.
pub struct Lane {
    pub mode: RunMode,
    pub runner: Arc<BlockingRunOnceLockRunner>,
}

pub fn build_lane(
    config: &WardenConfig,
    repo: Arc<dyn WardenRepository>,
    lock: Arc<dyn LockManager>,
    metrics: Arc<SyncMetrics>,
    mode: RunMode,
) -> anyhow::Result<Lane> {
    let registry = Registry::builtin()?;
    let connectors = registry.resolve(&config.connectors)?;
    let runnable = connectors.iter().filter(|c| c.is_runnable(mode)).count();
    info!(mode = %mode, configured = connectors.len(), runnable, "Resolved connectors");

    let db_runner = DbRunner::new(
        repo,
        connectors,
        RunPolicy::from_config(&config.sync, mode),
        mode,
        Arc::new(LogReporter),
    )
    .with_evaluation(config.sync.evaluation_mode)
    .with_metrics(metrics);

    let runner = BlockingRunOnceLockRunner::new(
        lock,
        Arc::new(db_runner),
        mode.lock_scope(),
        &config.lock,
    );
    Ok(Lane {
        mode,
        runner: Arc::new(runner),
    })
}

pub fn lock_manager(config: &WardenConfig, repo: Arc<dyn WardenRepository>) -> Arc<dyn LockManager> {
    let owner = instance_id(config);
    info!(owner = %owner, mode = ?config.lock.mode, "Using lock manager");
    build_lock_manager(&config.lock, repo, owner)
}

/// A root context canceled with `Shutdown` on the first Ctrl-C.
pub fn shutdown_context() -> RunContext {
    let ctx = RunContext::new();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                on_signal.cancel(CancelReason::Shutdown);
            }
            Err(e) => warn!("Failed to install Ctrl-C handler: {e}"),
        }
    });
    ctx
}
