//! Store-backed "resync now" signals.
//!
//! Any process can publish on a mode's channel; each worker lane polls the
//! channel and turns new signals into a scheduler trigger. Listeners start at
//! the newest signal, so anything published while no worker was listening is
//! not replayed. Publishing prunes signals older than [`SIGNAL_RETENTION`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::db::repository::{SignalRepository, WardenRepository};
use crate::error::Result;
use crate::models::sync::RunMode;
use crate::scheduler::TriggerSender;

/// How long a published signal stays readable. Listener poll intervals must
/// be shorter.
pub const SIGNAL_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Publish a resync request for `mode`. Returns the signal id.
pub async fn publish_resync(repo: &dyn WardenRepository, mode: RunMode) -> Result<i64> {
    prune_expired(repo).await;
    let id = repo.publish_signal(mode.signal_channel()).await?;
    info!(mode = %mode, channel = mode.signal_channel(), id, "Published resync signal");
    Ok(id)
}

async fn prune_expired(repo: &dyn WardenRepository) {
    let Ok(retention) = chrono::Duration::from_std(SIGNAL_RETENTION) else {
        return;
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
        return;
    };
    match repo.prune_signals(cutoff).await {
        Ok(0) => {}
        Ok(pruned) => debug!(pruned, "Pruned old resync signals"),
        Err(e) => warn!(error = %e, "Failed to prune resync signals"),
    }
}

pub struct ResyncListener {
    repo: Arc<dyn WardenRepository>,
    mode: RunMode,
    trigger: TriggerSender,
    poll: Duration,
    last_seen: i64,
}

impl ResyncListener {
    /// Start listening from the newest signal currently on the channel.
    pub async fn subscribe(
        repo: Arc<dyn WardenRepository>,
        mode: RunMode,
        trigger: TriggerSender,
        poll: Duration,
    ) -> Result<Self> {
        let last_seen = repo.latest_signal_id(mode.signal_channel()).await?;
        debug!(mode = %mode, last_seen, "Subscribed to resync channel");
        Ok(Self {
            repo,
            mode,
            trigger,
            poll,
            last_seen,
        })
    }

    /// Poll until `ctx` is canceled. Each batch of new signals becomes one
    /// trigger. Poll errors are logged and retried on the next tick.
    pub async fn run(mut self, ctx: RunContext) {
        let channel = self.mode.signal_channel();
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let ids = match self.repo.signals_after(channel, self.last_seen).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(channel, error = %e, "Failed to poll resync signals");
                    continue;
                }
            };
            let Some(&newest) = ids.last() else {
                continue;
            };
            self.last_seen = newest;
            let accepted = self.trigger.trigger();
            info!(
                channel,
                signals = ids.len(),
                accepted,
                "Resync requested"
            );
        }
    }
}
