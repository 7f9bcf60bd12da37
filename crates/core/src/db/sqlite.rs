use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::models::{
    identity::{EntitlementRecord, ExpiryCounts, IdentityRecord, StoredEntitlement, StoredIdentity},
    lock::LockRecord,
    sync::{FinishedRun, RunMode, SyncErrorKind, SyncRun, SyncStatus},
};

use super::repository::{
    EntitlementRepository, IdentityRepository, LockRepository, SignalRepository,
    SyncRunRepository, WardenRepository,
};

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl WardenRepository for SqliteRepository {}

// -- Helper functions for parsing enums from DB strings --

fn parse_sync_status(s: &str) -> SyncStatus {
    match s {
        "running" => SyncStatus::Running,
        "succeeded" => SyncStatus::Succeeded,
        "failed" => SyncStatus::Failed,
        _ => SyncStatus::Failed,
    }
}

fn parse_error_kind(s: &str) -> SyncErrorKind {
    match s {
        "api" => SyncErrorKind::Api,
        "db" => SyncErrorKind::Db,
        "lock_lost" => SyncErrorKind::LockLost,
        "canceled" => SyncErrorKind::Canceled,
        _ => SyncErrorKind::Other,
    }
}

fn parse_run_mode(s: &str) -> RunMode {
    match s {
        "discovery" => RunMode::Discovery,
        _ => RunMode::Full,
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Fixed-width UTC timestamps so stored values order lexically.
fn datetime_to_str(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Column holding the last run of `mode` that observed a row.
fn watermark_column(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Full => "seen_in_full_run_id",
        RunMode::Discovery => "seen_in_discovery_run_id",
    }
}

/// Bind values for the two watermark columns; the other mode's stays NULL.
fn watermarks(mode: RunMode, run_id: &str) -> (Option<&str>, Option<&str>) {
    match mode {
        RunMode::Full => (Some(run_id), None),
        RunMode::Discovery => (None, Some(run_id)),
    }
}

fn attributes_to_str(v: &Option<serde_json::Value>) -> Option<String> {
    v.as_ref().map(|val| val.to_string())
}

fn row_to_sync_run(r: &sqlx::sqlite::SqliteRow) -> SyncRun {
    SyncRun {
        id: r.get("id"),
        source_kind: r.get("source_kind"),
        source_name: r.get("source_name"),
        mode: parse_run_mode(r.get("mode")),
        status: parse_sync_status(r.get("status")),
        started_at: parse_datetime(r.get("started_at")),
        finished_at: r
            .get::<Option<String>, _>("finished_at")
            .map(|s| parse_datetime(&s)),
        error_kind: r
            .get::<Option<String>, _>("error_kind")
            .map(|s| parse_error_kind(&s)),
        error_message: r.get("error_message"),
        duration_ms: r.get("duration_ms"),
        rows_written: r.get::<i64, _>("rows_written"),
        rows_expired: r.get::<i64, _>("rows_expired"),
    }
}

fn row_to_lock(r: &sqlx::sqlite::SqliteRow) -> LockRecord {
    LockRecord {
        scope: r.get("scope"),
        owner_id: r.get("owner_id"),
        lease_id: r.get("lease_id"),
        lease_expires_at: parse_datetime(r.get("lease_expires_at")),
        heartbeat_at: parse_datetime(r.get("heartbeat_at")),
        acquired_at: parse_datetime(r.get("acquired_at")),
    }
}

const SYNC_RUN_COLUMNS: &str = "id, source_kind, source_name, mode, status, started_at, finished_at, error_kind, error_message, duration_ms, rows_written, rows_expired";

// -- SyncRunRepository --

#[async_trait]
impl SyncRunRepository for SqliteRepository {
    async fn create_sync_run(&self, kind: &str, name: &str, mode: RunMode) -> Result<SyncRun> {
        let id = Uuid::new_v4().to_string();
        let now = datetime_to_str(&Utc::now());
        sqlx::query(
            "INSERT INTO sync_runs (id, source_kind, source_name, mode, status, started_at, rows_written, rows_expired)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0)",
        )
        .bind(&id)
        .bind(kind)
        .bind(name)
        .bind(mode.as_str())
        .bind(SyncStatus::Running.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(SyncRun {
            id,
            source_kind: kind.to_string(),
            source_name: name.to_string(),
            mode,
            status: SyncStatus::Running,
            started_at: parse_datetime(&now),
            finished_at: None,
            error_kind: None,
            error_message: None,
            duration_ms: None,
            rows_written: 0,
            rows_expired: 0,
        })
    }

    async fn finalize_sync_run(
        &self,
        id: &str,
        kind: &str,
        name: &str,
        mode: RunMode,
        duration_ms: i64,
        rows_written: i64,
    ) -> Result<ExpiryCounts> {
        let now = datetime_to_str(&Utc::now());
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query("SELECT status FROM sync_runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| r.get("status"));
        if status.as_deref() != Some(SyncStatus::Running.as_str()) {
            return Err(WardenError::RunNotOpen(id.to_string()));
        }

        let watermark = watermark_column(mode);
        let identities = sqlx::query(&format!(
            "UPDATE identities SET expired_at = ?1
             WHERE source_kind = ?2 AND source_name = ?3 AND {watermark} IS NOT ?4 AND expired_at IS NULL"
        ))
        .bind(&now)
        .bind(kind)
        .bind(name)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Discovery passes only observe identities; their entitlements stay untouched.
        let entitlements = if mode == RunMode::Full {
            sqlx::query(&format!(
                "UPDATE entitlements SET expired_at = ?1
                 WHERE source_kind = ?2 AND source_name = ?3 AND {watermark} IS NOT ?4 AND expired_at IS NULL"
            ))
            .bind(&now)
            .bind(kind)
            .bind(name)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            0
        };

        let counts = ExpiryCounts {
            identities,
            entitlements,
        };

        sqlx::query(
            "UPDATE sync_runs SET status = ?1, finished_at = ?2, duration_ms = ?3, rows_written = ?4, rows_expired = ?5
             WHERE id = ?6 AND status = 'running'",
        )
        .bind(SyncStatus::Succeeded.as_str())
        .bind(&now)
        .bind(duration_ms)
        .bind(rows_written)
        .bind(counts.total() as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(counts)
    }

    async fn fail_sync_run(
        &self,
        id: &str,
        error_kind: SyncErrorKind,
        error_message: &str,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        let now = datetime_to_str(&Utc::now());
        let result = sqlx::query(
            "UPDATE sync_runs SET status = ?1, finished_at = ?2, error_kind = ?3, error_message = ?4, duration_ms = ?5
             WHERE id = ?6 AND status = 'running'",
        )
        .bind(SyncStatus::Failed.as_str())
        .bind(&now)
        .bind(error_kind.as_str())
        .bind(error_message)
        .bind(duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_sync_run(&self, id: &str) -> Result<Option<SyncRun>> {
        let row = sqlx::query(&format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_sync_run))
    }

    async fn recent_finished_runs(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        limit: u32,
    ) -> Result<Vec<FinishedRun>> {
        let rows = sqlx::query(
            "SELECT status, finished_at FROM sync_runs
             WHERE source_kind = ?1 AND source_name = ?2 AND mode = ?3
               AND status IN ('succeeded', 'failed') AND finished_at IS NOT NULL
             ORDER BY finished_at DESC, rowid DESC LIMIT ?4",
        )
        .bind(kind)
        .bind(name)
        .bind(mode.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| FinishedRun {
                status: parse_sync_status(r.get("status")),
                finished_at: parse_datetime(r.get("finished_at")),
            })
            .collect())
    }

    async fn list_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_sync_run).collect())
    }
}

// -- IdentityRepository --

#[async_trait]
impl IdentityRepository for SqliteRepository {
    async fn upsert_identities(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        run_id: &str,
        rows: &[IdentityRecord],
    ) -> Result<u64> {
        let now = datetime_to_str(&Utc::now());
        let (full_run, discovery_run) = watermarks(mode, run_id);
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO identities (source_kind, source_name, external_id, email, display_name, status, attributes, first_seen_at, last_seen_at, seen_in_run_id, seen_in_full_run_id, seen_in_discovery_run_id, expired_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL)
                 ON CONFLICT(source_kind, source_name, external_id) DO UPDATE SET
                    email = excluded.email,
                    display_name = excluded.display_name,
                    status = excluded.status,
                    attributes = excluded.attributes,
                    last_seen_at = excluded.last_seen_at,
                    seen_in_run_id = excluded.seen_in_run_id,
                    seen_in_full_run_id = COALESCE(excluded.seen_in_full_run_id, identities.seen_in_full_run_id),
                    seen_in_discovery_run_id = COALESCE(excluded.seen_in_discovery_run_id, identities.seen_in_discovery_run_id),
                    expired_at = NULL",
            )
            .bind(kind)
            .bind(name)
            .bind(&row.external_id)
            .bind(&row.email)
            .bind(&row.display_name)
            .bind(&row.status)
            .bind(attributes_to_str(&row.attributes))
            .bind(&now)
            .bind(&now)
            .bind(run_id)
            .bind(full_run)
            .bind(discovery_run)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn list_identities(&self, kind: &str, name: &str) -> Result<Vec<StoredIdentity>> {
        let rows = sqlx::query(
            "SELECT source_kind, source_name, external_id, email, display_name, status, seen_in_run_id, first_seen_at, last_seen_at, expired_at
             FROM identities WHERE source_kind = ?1 AND source_name = ?2 ORDER BY external_id",
        )
        .bind(kind)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| StoredIdentity {
                source_kind: r.get("source_kind"),
                source_name: r.get("source_name"),
                external_id: r.get("external_id"),
                email: r.get("email"),
                display_name: r.get("display_name"),
                status: r.get("status"),
                seen_in_run_id: r.get("seen_in_run_id"),
                first_seen_at: parse_datetime(r.get("first_seen_at")),
                last_seen_at: parse_datetime(r.get("last_seen_at")),
                expired_at: r
                    .get::<Option<String>, _>("expired_at")
                    .map(|s| parse_datetime(&s)),
            })
            .collect())
    }
}

// -- EntitlementRepository --

#[async_trait]
impl EntitlementRepository for SqliteRepository {
    async fn upsert_entitlements(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        run_id: &str,
        rows: &[EntitlementRecord],
    ) -> Result<u64> {
        let now = datetime_to_str(&Utc::now());
        let (full_run, discovery_run) = watermarks(mode, run_id);
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO entitlements (source_kind, source_name, external_id, identity_external_id, resource, permission, first_seen_at, last_seen_at, seen_in_run_id, seen_in_full_run_id, seen_in_discovery_run_id, expired_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)
                 ON CONFLICT(source_kind, source_name, external_id) DO UPDATE SET
                    identity_external_id = excluded.identity_external_id,
                    resource = excluded.resource,
                    permission = excluded.permission,
                    last_seen_at = excluded.last_seen_at,
                    seen_in_run_id = excluded.seen_in_run_id,
                    seen_in_full_run_id = COALESCE(excluded.seen_in_full_run_id, entitlements.seen_in_full_run_id),
                    seen_in_discovery_run_id = COALESCE(excluded.seen_in_discovery_run_id, entitlements.seen_in_discovery_run_id),
                    expired_at = NULL",
            )
            .bind(kind)
            .bind(name)
            .bind(&row.external_id)
            .bind(&row.identity_external_id)
            .bind(&row.resource)
            .bind(&row.permission)
            .bind(&now)
            .bind(&now)
            .bind(run_id)
            .bind(full_run)
            .bind(discovery_run)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn list_entitlements(&self, kind: &str, name: &str) -> Result<Vec<StoredEntitlement>> {
        let rows = sqlx::query(
            "SELECT source_kind, source_name, external_id, identity_external_id, resource, permission, seen_in_run_id, expired_at
             FROM entitlements WHERE source_kind = ?1 AND source_name = ?2 ORDER BY external_id",
        )
        .bind(kind)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| StoredEntitlement {
                source_kind: r.get("source_kind"),
                source_name: r.get("source_name"),
                external_id: r.get("external_id"),
                identity_external_id: r.get("identity_external_id"),
                resource: r.get("resource"),
                permission: r.get("permission"),
                seen_in_run_id: r.get("seen_in_run_id"),
                expired_at: r
                    .get::<Option<String>, _>("expired_at")
                    .map(|s| parse_datetime(&s)),
            })
            .collect())
    }
}

// -- LockRepository --

#[async_trait]
impl LockRepository for SqliteRepository {
    async fn try_acquire_lock(
        &self,
        scope: &str,
        owner_id: &str,
        lease_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let now = datetime_to_str(&now);
        let result = sqlx::query(
            "INSERT INTO sync_locks (scope, owner_id, lease_id, lease_expires_at, heartbeat_at, acquired_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(scope) DO UPDATE SET
                owner_id = excluded.owner_id,
                lease_id = excluded.lease_id,
                lease_expires_at = excluded.lease_expires_at,
                heartbeat_at = excluded.heartbeat_at,
                acquired_at = excluded.acquired_at
             WHERE sync_locks.lease_expires_at <= ?7",
        )
        .bind(scope)
        .bind(owner_id)
        .bind(lease_id)
        .bind(datetime_to_str(&expires_at))
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn renew_lock(
        &self,
        scope: &str,
        lease_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_locks SET lease_expires_at = ?1, heartbeat_at = ?2 WHERE scope = ?3 AND lease_id = ?4",
        )
        .bind(datetime_to_str(&expires_at))
        .bind(datetime_to_str(&now))
        .bind(scope)
        .bind(lease_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, scope: &str, lease_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE scope = ?1 AND lease_id = ?2")
            .bind(scope)
            .bind(lease_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_lock(&self, scope: &str) -> Result<Option<LockRecord>> {
        let row = sqlx::query(
            "SELECT scope, owner_id, lease_id, lease_expires_at, heartbeat_at, acquired_at FROM sync_locks WHERE scope = ?1",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_lock))
    }

    async fn list_locks(&self) -> Result<Vec<LockRecord>> {
        let rows = sqlx::query(
            "SELECT scope, owner_id, lease_id, lease_expires_at, heartbeat_at, acquired_at FROM sync_locks ORDER BY scope",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_lock).collect())
    }
}

// -- SignalRepository --

#[async_trait]
impl SignalRepository for SqliteRepository {
    async fn publish_signal(&self, channel: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO sync_signals (channel, created_at) VALUES (?1, ?2)")
            .bind(channel)
            .bind(datetime_to_str(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn latest_signal_id(&self, channel: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS latest FROM sync_signals WHERE channel = ?1")
            .bind(channel)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("latest"))
    }

    async fn signals_after(&self, channel: &str, after_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM sync_signals WHERE channel = ?1 AND id > ?2 ORDER BY id")
            .bind(channel)
            .bind(after_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    async fn prune_signals(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_signals WHERE created_at < ?1")
            .bind(datetime_to_str(&cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
