//! Cross-process mutual exclusion for sync scopes.
//!
//! The lease backing stores one row per scope in `sync_locks`. A holder keeps
//! it alive by renewing before the TTL lapses; once the lease has expired any
//! instance may take it over, and the previous holder's renewals then fail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{LockConfig, LockMode};
use crate::db::repository::{LockRepository, WardenRepository};
use crate::error::{Result, WardenError};
use crate::models::lock::LockToken;

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take the scope if it is free or its lease has expired. Fails fast with
    /// `LockHeld` otherwise.
    async fn acquire(&self, scope: &str) -> Result<LockToken>;
    /// Extend the lease by one TTL from now. Fails with `LockLost` when the
    /// scope no longer carries this token's lease.
    async fn heartbeat(&self, token: &LockToken) -> Result<LockToken>;
    /// Give the scope up if it is still ours.
    async fn release(&self, token: LockToken) -> Result<()>;
}

/// Instance id used as the lock owner when none is configured.
pub fn generate_instance_id(instance_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", instance_name, std::process::id(), &suffix[..8])
}

/// Pick the lock backing selected by `[lock] mode`.
pub fn build_lock_manager(
    config: &LockConfig,
    repo: Arc<dyn WardenRepository>,
    owner_id: String,
) -> Arc<dyn LockManager> {
    match config.mode {
        LockMode::Lease => Arc::new(LeaseLockManager::new(repo, owner_id, config.ttl())),
        LockMode::SingleInstance => Arc::new(SingleInstanceLockManager::new(owner_id)),
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Lease locks stored in the relational store.
pub struct LeaseLockManager {
    repo: Arc<dyn WardenRepository>,
    owner_id: String,
    ttl: std::time::Duration,
    clock: Clock,
}

impl LeaseLockManager {
    pub fn new(repo: Arc<dyn WardenRepository>, owner_id: String, ttl: std::time::Duration) -> Self {
        Self {
            repo,
            owner_id,
            ttl,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, for driving lease expiry in tests.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                WardenError::Config(format!(
                    "lock ttl of {}s is out of range",
                    self.ttl.as_secs()
                ))
            })
    }
}

#[async_trait]
impl LockManager for LeaseLockManager {
    async fn acquire(&self, scope: &str) -> Result<LockToken> {
        let now = (self.clock)();
        let expires_at = self.lease_expiry(now)?;
        let lease_id = Uuid::new_v4().to_string();

        if self
            .repo
            .try_acquire_lock(scope, &self.owner_id, &lease_id, now, expires_at)
            .await?
        {
            info!(scope, owner = %self.owner_id, lease = %lease_id, "Acquired sync lock");
            return Ok(LockToken {
                scope: scope.to_string(),
                owner_id: self.owner_id.clone(),
                lease_id,
                lease_expires_at: expires_at,
            });
        }

        let owner = self
            .repo
            .get_lock(scope)
            .await?
            .map(|r| r.owner_id)
            .unwrap_or_else(|| "unknown".to_string());
        debug!(scope, owner = %owner, "Sync lock is held elsewhere");
        Err(WardenError::LockHeld {
            scope: scope.to_string(),
            owner,
        })
    }

    async fn heartbeat(&self, token: &LockToken) -> Result<LockToken> {
        let now = (self.clock)();
        let expires_at = self.lease_expiry(now)?;
        if !self
            .repo
            .renew_lock(&token.scope, &token.lease_id, now, expires_at)
            .await?
        {
            warn!(scope = %token.scope, lease = %token.lease_id, "Sync lock lease was taken over");
            return Err(WardenError::LockLost(token.scope.clone()));
        }
        Ok(LockToken {
            lease_expires_at: expires_at,
            ..token.clone()
        })
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        if self.repo.release_lock(&token.scope, &token.lease_id).await? {
            info!(scope = %token.scope, "Released sync lock");
        } else {
            debug!(scope = %token.scope, "Sync lock was no longer ours at release");
        }
        Ok(())
    }
}

/// For deployments that run exactly one worker. Always grants the scope and
/// keeps no shared state.
#[derive(Debug, Clone)]
pub struct SingleInstanceLockManager {
    owner_id: String,
}

impl SingleInstanceLockManager {
    pub fn new(owner_id: String) -> Self {
        Self { owner_id }
    }
}

#[async_trait]
impl LockManager for SingleInstanceLockManager {
    async fn acquire(&self, scope: &str) -> Result<LockToken> {
        Ok(LockToken {
            scope: scope.to_string(),
            owner_id: self.owner_id.clone(),
            lease_id: Uuid::new_v4().to_string(),
            lease_expires_at: DateTime::<Utc>::MAX_UTC,
        })
    }

    async fn heartbeat(&self, token: &LockToken) -> Result<LockToken> {
        Ok(token.clone())
    }

    async fn release(&self, _token: LockToken) -> Result<()> {
        Ok(())
    }
}
