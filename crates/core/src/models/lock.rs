use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted lease on a lock scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub scope: String,
    pub owner_id: String,
    pub lease_id: String,
    pub lease_expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at <= now
    }
}

/// Proof of ownership handed out by the lock manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub scope: String,
    pub owner_id: String,
    pub lease_id: String,
    pub lease_expires_at: DateTime<Utc>,
}
