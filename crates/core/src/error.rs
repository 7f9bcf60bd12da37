//! Error types for the Warden core crate.

use thiserror::Error;

use crate::models::sync::SyncErrorKind;

/// Top-level error type for all Warden core operations.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("registry error: {0}")]
    Registry(String),

    /// The upstream platform call failed (auth, rate limit, bad payload).
    #[error("API error: {0}")]
    Api(String),

    #[error("scope {scope} is held by {owner}")]
    LockHeld { scope: String, owner: String },

    #[error("lock lost for scope {0}")]
    LockLost(String),

    #[error("run canceled")]
    Canceled,

    #[error("sync run {0} is not open")]
    RunNotOpen(String),

    #[error("{failed} connector(s) failed: {names}")]
    PartialFailure { failed: usize, names: String },

    #[error("integration error: {0}")]
    Integration(String),
}

impl WardenError {
    /// Map an error onto the failure taxonomy recorded on sync runs.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            WardenError::Api(_) => SyncErrorKind::Api,
            WardenError::Database(_) | WardenError::Migration(_) | WardenError::RunNotOpen(_) => {
                SyncErrorKind::Db
            }
            WardenError::LockLost(_) => SyncErrorKind::LockLost,
            WardenError::Canceled => SyncErrorKind::Canceled,
            _ => SyncErrorKind::Other,
        }
    }
}

/// A convenience Result alias that defaults to [`WardenError`].
pub type Result<T> = std::result::Result<T, WardenError>;
