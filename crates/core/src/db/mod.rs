pub mod repository;
pub mod sqlite;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// How long a writer waits on a locked SQLite file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub enum DatabasePool {
    Sqlite(SqlitePool),
}

impl DatabasePool {
    /// Create a new SQLite database pool from a connection string and run migrations.
    pub async fn new_sqlite(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    /// Create a new in-memory SQLite database pool and run migrations. Useful for testing.
    ///
    /// The pool is pinned to a single connection so every caller sees the same database.
    pub async fn new_sqlite_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    pub fn into_sqlite(self) -> SqlitePool {
        match self {
            DatabasePool::Sqlite(p) => p,
        }
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        let migrations: &[&str] = &[
            include_str!("../../../../migrations/sqlite/001_sync_runs.sql"),
            include_str!("../../../../migrations/sqlite/002_identities.sql"),
            include_str!("../../../../migrations/sqlite/003_locks_signals.sql"),
            include_str!("../../../../migrations/sqlite/004_mode_watermarks.sql"),
        ];

        for migration_sql in migrations {
            for statement in migration_sql.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    // Ignore errors from ALTER TABLE if column already exists
                    let result = sqlx::query(trimmed).execute(pool).await;
                    if let Err(e) = &result {
                        let msg = e.to_string();
                        if msg.contains("duplicate column") || msg.contains("already exists") {
                            continue;
                        }
                        result?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn memory_pool_runs_migrations() {
        let pool = DatabasePool::new_sqlite_memory().await.unwrap().into_sqlite();
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        for table in ["entitlements", "identities", "sync_locks", "sync_runs", "sync_signals"] {
            assert!(names.iter().any(|n| n == table), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn file_pool_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");
        let connect = format!("sqlite:{}?mode=rwc", path.display());
        DatabasePool::new_sqlite(&connect).await.unwrap();
        DatabasePool::new_sqlite(&connect).await.unwrap();
        assert!(path.exists());
    }
}
