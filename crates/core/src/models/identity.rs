use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account observed at a source, as reported by a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityRecord {
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default = "default_identity_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
}

fn default_identity_status() -> String {
    "active".into()
}

impl IdentityRecord {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            email: None,
            display_name: None,
            status: default_identity_status(),
            attributes: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A permission grant observed at a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitlementRecord {
    pub external_id: String,
    pub identity_external_id: String,
    pub resource: String,
    pub permission: String,
}

/// An identity row as persisted, with its watermark columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub source_kind: String,
    pub source_name: String,
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub status: String,
    pub seen_in_run_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
}

/// An entitlement row as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntitlement {
    pub source_kind: String,
    pub source_name: String,
    pub external_id: String,
    pub identity_external_id: String,
    pub resource: String,
    pub permission: String,
    pub seen_in_run_id: String,
    pub expired_at: Option<DateTime<Utc>>,
}

/// Rows expired by a finalize, split by table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryCounts {
    pub identities: u64,
    pub entitlements: u64,
}

impl ExpiryCounts {
    pub fn total(&self) -> u64 {
        self.identities + self.entitlements
    }
}
