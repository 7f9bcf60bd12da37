use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    identity::{EntitlementRecord, ExpiryCounts, IdentityRecord, StoredEntitlement, StoredIdentity},
    lock::LockRecord,
    sync::{FinishedRun, RunMode, SyncErrorKind, SyncRun},
};

#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn create_sync_run(&self, kind: &str, name: &str, mode: RunMode) -> Result<SyncRun>;

    /// Apply drift expiry over the (kind, name) scope and mark the run
    /// succeeded, atomically. Only rows whose `mode` watermark is another run
    /// are expired, so an overlapping pass of the other mode never hides rows. Fails with `RunNotOpen` if the run is terminal.
    async fn finalize_sync_run(
        &self,
        id: &str,
        kind: &str,
        name: &str,
        mode: RunMode,
        duration_ms: i64,
        rows_written: i64,
    ) -> Result<ExpiryCounts>;

    /// Mark a running run failed. Returns false if it was already terminal.
    async fn fail_sync_run(
        &self,
        id: &str,
        error_kind: SyncErrorKind,
        error_message: &str,
        duration_ms: Option<i64>,
    ) -> Result<bool>;

    async fn get_sync_run(&self, id: &str) -> Result<Option<SyncRun>>;

    /// Finished runs for one connector instance and mode, newest first.
    async fn recent_finished_runs(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        limit: u32,
    ) -> Result<Vec<FinishedRun>>;

    async fn list_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Idempotent upsert stamping every row with `run_id` in the `mode`
    /// watermark; clears `expired_at`.
    async fn upsert_identities(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        run_id: &str,
        rows: &[IdentityRecord],
    ) -> Result<u64>;
    async fn list_identities(&self, kind: &str, name: &str) -> Result<Vec<StoredIdentity>>;
}

#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    async fn upsert_entitlements(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        run_id: &str,
        rows: &[EntitlementRecord],
    ) -> Result<u64>;
    async fn list_entitlements(&self, kind: &str, name: &str) -> Result<Vec<StoredEntitlement>>;
}

#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Insert or take over the scope row if absent or expired at `now`.
    async fn try_acquire_lock(
        &self,
        scope: &str,
        owner_id: &str,
        lease_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Extend the lease if the row still carries `lease_id`.
    async fn renew_lock(
        &self,
        scope: &str,
        lease_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn release_lock(&self, scope: &str, lease_id: &str) -> Result<bool>;
    async fn get_lock(&self, scope: &str) -> Result<Option<LockRecord>>;
    async fn list_locks(&self) -> Result<Vec<LockRecord>>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn publish_signal(&self, channel: &str) -> Result<i64>;
    /// Highest signal id on the channel, 0 when empty.
    async fn latest_signal_id(&self, channel: &str) -> Result<i64>;
    async fn signals_after(&self, channel: &str, after_id: i64) -> Result<Vec<i64>>;
    /// Delete signals created before `cutoff`. Ids are never reused.
    async fn prune_signals(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Combined repository trait for everything the orchestration core persists.
pub trait WardenRepository:
    SyncRunRepository + IdentityRepository + EntitlementRepository + LockRepository + SignalRepository
{
}
