//! Periodic driver for a [`RunOnce`] with a coalescing "run now" mailbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::runner::RunOnce;

/// Create a trigger mailbox holding at most one pending request.
pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerSender { tx }, TriggerReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<()>,
}

impl TriggerSender {
    /// Ask for an immediate run. Returns false when a request is already
    /// pending or the scheduler is gone; the request is dropped either way.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

impl TriggerReceiver {
    /// Wait for the next request. False once every sender is dropped.
    pub async fn recv(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Take a pending request without waiting.
    pub fn try_recv(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Tick,
    Trigger,
}

pub struct Scheduler {
    name: String,
    runner: Arc<dyn RunOnce>,
    interval: Duration,
    triggers: TriggerReceiver,
}

impl Scheduler {
    pub fn new(
        name: impl Into<String>,
        runner: Arc<dyn RunOnce>,
        interval: Duration,
        triggers: TriggerReceiver,
    ) -> Self {
        Self {
            name: name.into(),
            runner,
            interval,
            triggers,
        }
    }

    /// Run until `ctx` is canceled. The first tick fires immediately.
    ///
    /// Invocations never overlap. Whatever wakes the loop absorbs the other
    /// pending signal and restarts the tick timer, so a burst of ticks and
    /// triggers during a run collapses into a single follow-up run.
    pub async fn run(mut self, ctx: RunContext) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut triggers_open = true;

        info!(scheduler = %self.name, interval_secs = self.interval.as_secs(), "Scheduler started");
        loop {
            let wake = tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => Wake::Tick,
                open = self.triggers.recv(), if triggers_open => {
                    if !open {
                        debug!(scheduler = %self.name, "Trigger mailbox closed");
                        triggers_open = false;
                        continue;
                    }
                    Wake::Trigger
                }
            };

            while self.triggers.try_recv() {}
            ticker.reset();

            debug!(scheduler = %self.name, wake = ?wake, "Running pass");
            if let Err(e) = self.runner.run_once(&ctx).await {
                if ctx.is_cancelled() {
                    break;
                }
                warn!(scheduler = %self.name, error = %e, "Pass finished with errors");
            }
        }
        info!(scheduler = %self.name, "Scheduler stopped");
    }
}
