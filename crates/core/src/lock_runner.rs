//! Wraps a [`RunOnce`] in a scope lock with a background heartbeat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LockConfig;
use crate::context::{CancelReason, RunContext};
use crate::error::{Result, WardenError};
use crate::lock::LockManager;
use crate::models::lock::LockToken;
use crate::runner::RunOnce;

pub struct BlockingRunOnceLockRunner {
    lock: Arc<dyn LockManager>,
    inner: Arc<dyn RunOnce>,
    scope: String,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl BlockingRunOnceLockRunner {
    pub fn new(
        lock: Arc<dyn LockManager>,
        inner: Arc<dyn RunOnce>,
        scope: impl Into<String>,
        config: &LockConfig,
    ) -> Self {
        Self {
            lock,
            inner,
            scope: scope.into(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

#[async_trait]
impl RunOnce for BlockingRunOnceLockRunner {
    async fn run_once(&self, ctx: &RunContext) -> Result<()> {
        let token = match self.lock.acquire(&self.scope).await {
            Ok(token) => token,
            Err(WardenError::LockHeld { scope, owner }) => {
                info!(scope = %scope, owner = %owner, "Scope held by another instance; skipping pass");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let run_ctx = ctx.child();
        let stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.lock.clone(),
            token.clone(),
            self.heartbeat_interval,
            self.heartbeat_timeout,
            run_ctx.clone(),
            stop.clone(),
        ));

        let result = self.inner.run_once(&run_ctx).await;

        stop.cancel();
        let lost = match heartbeat.await {
            Ok(lost) => lost,
            Err(e) => {
                error!(scope = %self.scope, error = %e, "Heartbeat task panicked");
                true
            }
        };

        if let Err(e) = self.lock.release(token).await {
            warn!(scope = %self.scope, error = %e, "Failed to release sync lock");
        }

        if lost {
            return Err(WardenError::LockLost(self.scope.clone()));
        }
        result
    }
}

/// Renew the lease every `interval` until `stop` fires. Returns true if the
/// lease was lost, after canceling `run_ctx` with `LockLost`.
async fn heartbeat_loop(
    lock: Arc<dyn LockManager>,
    mut token: LockToken,
    interval: Duration,
    timeout: Duration,
    run_ctx: RunContext,
    stop: CancellationToken,
) -> bool {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return false,
            _ = ticker.tick() => {}
        }

        match tokio::time::timeout(timeout, lock.heartbeat(&token)).await {
            Ok(Ok(renewed)) => {
                debug!(scope = %renewed.scope, expires_at = %renewed.lease_expires_at, "Lease renewed");
                token = renewed;
            }
            Ok(Err(e)) => {
                error!(scope = %token.scope, error = %e, "Heartbeat failed; canceling run");
                run_ctx.cancel(CancelReason::LockLost);
                return true;
            }
            Err(_) => {
                error!(scope = %token.scope, timeout_ms = timeout.as_millis() as u64, "Heartbeat timed out; canceling run");
                run_ctx.cancel(CancelReason::LockLost);
                return true;
            }
        }
    }
}
