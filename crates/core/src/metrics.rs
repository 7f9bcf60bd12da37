//! In-process per-connector run counters.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::sync::{RunMode, SyncErrorKind};

/// One connector instance in one run mode. Full and discovery lanes keep
/// separate counters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricsKey {
    pub kind: String,
    pub name: String,
    pub mode: RunMode,
}

impl MetricsKey {
    pub fn new(kind: &str, name: &str, mode: RunMode) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            mode,
        }
    }
}

/// Counters for one (kind, name, mode).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorStats {
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
    pub last_error_kind: Option<SyncErrorKind>,
    pub rows_expired_total: u64,
}

#[derive(Debug, Default)]
pub struct SyncMetrics {
    inner: Mutex<BTreeMap<MetricsKey, ConnectorStats>>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<F: FnOnce(&mut ConnectorStats)>(&self, key: MetricsKey, f: F) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.entry(key).or_default());
    }

    pub fn record_success(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        duration: Duration,
        rows_expired: u64,
    ) {
        self.with_entry(MetricsKey::new(kind, name, mode), |s| {
            s.runs_succeeded += 1;
            s.consecutive_failures = 0;
            s.last_success_at = Some(Utc::now());
            s.last_duration = Some(duration);
            s.rows_expired_total += rows_expired;
        });
    }

    pub fn record_failure(
        &self,
        kind: &str,
        name: &str,
        mode: RunMode,
        duration: Duration,
        error_kind: SyncErrorKind,
    ) {
        self.with_entry(MetricsKey::new(kind, name, mode), |s| {
            s.runs_failed += 1;
            s.consecutive_failures += 1;
            s.last_duration = Some(duration);
            s.last_error_kind = Some(error_kind);
        });
    }

    pub fn get(&self, kind: &str, name: &str, mode: RunMode) -> Option<ConnectorStats> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(&MetricsKey::new(kind, name, mode)).cloned()
    }

    /// All counters ordered by (kind, name, mode).
    pub fn snapshot(&self) -> Vec<(MetricsKey, ConnectorStats)> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_consecutive_failures() {
        let metrics = SyncMetrics::new();
        metrics.record_failure("okta", "corp", RunMode::Full, Duration::from_secs(1), SyncErrorKind::Api);
        metrics.record_failure("okta", "corp", RunMode::Full, Duration::from_secs(1), SyncErrorKind::Api);
        let stats = metrics.get("okta", "corp", RunMode::Full).unwrap();
        assert_eq!(stats.consecutive_failures, 2);
        assert_eq!(stats.last_error_kind, Some(SyncErrorKind::Api));
        assert!(stats.last_success_at.is_none());

        metrics.record_success("okta", "corp", RunMode::Full, Duration::from_secs(4), 3);
        let stats = metrics.get("okta", "corp", RunMode::Full).unwrap();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.runs_succeeded, 1);
        assert_eq!(stats.runs_failed, 2);
        assert_eq!(stats.rows_expired_total, 3);
        assert_eq!(stats.last_duration, Some(Duration::from_secs(4)));
        assert!(stats.last_success_at.is_some());
    }

    #[test]
    fn snapshot_is_ordered() {
        let metrics = SyncMetrics::new();
        metrics.record_success("okta", "corp", RunMode::Full, Duration::ZERO, 0);
        metrics.record_success("github", "acme", RunMode::Full, Duration::ZERO, 0);
        let keys: Vec<MetricsKey> = metrics.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                MetricsKey::new("github", "acme", RunMode::Full),
                MetricsKey::new("okta", "corp", RunMode::Full)
            ]
        );
        assert!(metrics.get("slack", "x", RunMode::Full).is_none());
    }

    #[test]
    fn lanes_keep_separate_counters() {
        let metrics = SyncMetrics::new();
        metrics.record_failure("okta", "corp", RunMode::Discovery, Duration::ZERO, SyncErrorKind::LockLost);
        metrics.record_failure("okta", "corp", RunMode::Discovery, Duration::ZERO, SyncErrorKind::LockLost);
        metrics.record_success("okta", "corp", RunMode::Full, Duration::from_secs(2), 0);

        let full = metrics.get("okta", "corp", RunMode::Full).unwrap();
        assert_eq!(full.consecutive_failures, 0);
        assert!(full.last_error_kind.is_none());

        let discovery = metrics.get("okta", "corp", RunMode::Discovery).unwrap();
        assert_eq!(discovery.consecutive_failures, 2);
        assert_eq!(discovery.last_error_kind, Some(SyncErrorKind::LockLost));
        assert_eq!(metrics.snapshot().len(), 2);
    }
}
