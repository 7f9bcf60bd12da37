use chrono::Utc;
use warden_core::connectors::Registry;
use warden_core::db::repository::{LockRepository, SyncRunRepository};
use warden_core::models::sync::RunMode;
use warden_core::policy::RunPolicy;

use super::{load_config, open_repo};

const RECENT_RUNS: i64 = 10;

/// Run the `status` command: locks, per-connector due times and recent runs.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repo(&config).await?;

    let db_size = config
        .warden
        .database
        .path
        .as_deref()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|| "unknown".to_string());

    println!("Warden Status");
    println!("=============");
    println!("Instance: {}", config.warden.instance_name);
    println!("Database: SQLite ({})", db_size);
    println!();

    let now = Utc::now();
    println!("Locks");
    println!("-----");
    let locks = repo.list_locks().await?;
    if locks.is_empty() {
        println!("No scopes held.");
    }
    for lock in locks {
        let state = if lock.is_expired(now) { "expired" } else { "held" };
        println!(
            "{:<16} {:<8} owner={} expires={}",
            lock.scope,
            state,
            lock.owner_id,
            lock.lease_expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!();

    let registry = Registry::builtin()?;
    let connectors = registry.resolve(&config.connectors)?;
    println!("Connectors");
    println!("----------");
    if connectors.is_empty() {
        println!("No connectors configured.");
    }
    for mode in [RunMode::Full, RunMode::Discovery] {
        let policy = RunPolicy::from_config(&config.sync, mode);
        for instance in connectors.iter().filter(|c| c.is_runnable(mode)) {
            let history = repo
                .recent_finished_runs(instance.kind(), &instance.name, mode, policy.history_cap())
                .await?;
            let last = history
                .first()
                .map(|r| format!("{} at {}", r.status.as_str(), r.finished_at.format("%Y-%m-%d %H:%M:%S")))
                .unwrap_or_else(|| "never".into());
            let next = match policy.next_due_at(instance.kind(), &history, now) {
                Some(due) if due <= now => "now".to_string(),
                Some(due) => due.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                None => "never (no interval)".to_string(),
            };
            println!(
                "{}/{} [{}]: last {}, next {}",
                instance.kind(),
                instance.name,
                mode,
                last,
                next
            );
        }
    }
    println!();

    println!("Recent Runs");
    println!("-----------");
    let runs = repo.list_sync_runs(RECENT_RUNS).await?;
    if runs.is_empty() {
        println!("No sync runs recorded.");
    }
    for run in runs {
        let mut line = format!(
            "{} {}/{} {} {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.source_kind,
            run.source_name,
            run.mode,
            run.status.as_str()
        );
        if let Some(ms) = run.duration_ms {
            line.push_str(&format!(" {ms}ms"));
        }
        line.push_str(&format!(
            " written={} expired={}",
            run.rows_written, run.rows_expired
        ));
        if let (Some(kind), Some(msg)) = (run.error_kind, run.error_message.as_deref()) {
            line.push_str(&format!(" [{kind}] {msg}"));
        }
        println!("{line}");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
