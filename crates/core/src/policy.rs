//! Decides whether a connector instance is due to run.
//!
//! Due-ness is a pure function of the configured intervals, the failure
//! backoff and the instance's recent finished runs. Nothing is cached between
//! passes.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::SyncConfig;
use crate::models::sync::{FinishedRun, RunMode, SyncStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct RunPolicy {
    intervals: BTreeMap<String, Duration>,
    backoff_base: Duration,
    backoff_max: Duration,
    history_cap: u32,
}

impl RunPolicy {
    pub fn new(
        intervals: BTreeMap<String, Duration>,
        backoff_base: Duration,
        backoff_max: Duration,
        history_cap: u32,
    ) -> Self {
        Self {
            intervals,
            backoff_base,
            backoff_max,
            history_cap: history_cap.max(1),
        }
    }

    /// Policy for one run mode lane, using that lane's interval map.
    pub fn from_config(config: &SyncConfig, mode: RunMode) -> Self {
        let intervals = config
            .intervals_for(mode)
            .iter()
            .map(|(kind, secs)| (kind.clone(), seconds(*secs)))
            .collect();
        Self::new(
            intervals,
            seconds(config.failure_backoff_base_seconds),
            seconds(config.failure_backoff_max_seconds),
            config.recent_finished_run_cap,
        )
    }

    /// How many finished runs callers should load for `is_due`.
    pub fn history_cap(&self) -> u32 {
        self.history_cap
    }

    pub fn interval_for(&self, kind: &str) -> Option<Duration> {
        self.intervals.get(kind).copied()
    }

    /// Wait after `consecutive_failures` trailing failures:
    /// `min(base * 2^(n-1), max)`.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::zero();
        }
        let shift = (consecutive_failures - 1).min(30);
        let factor = 1i32 << shift;
        self.backoff_base
            .checked_mul(factor)
            .map(|d| d.min(self.backoff_max))
            .unwrap_or(self.backoff_max)
    }

    /// Earliest instant the instance may run again. `None` means never (no
    /// interval configured for `kind`). History is newest first.
    pub fn next_due_at(
        &self,
        kind: &str,
        history: &[FinishedRun],
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let interval = self.interval_for(kind)?;
        let Some(last) = history.first() else {
            return Some(now);
        };

        let wait = match last.status {
            SyncStatus::Failed => {
                let failures = history
                    .iter()
                    .take(self.history_cap as usize)
                    .take_while(|r| r.status == SyncStatus::Failed)
                    .count() as u32;
                self.backoff_for(failures)
            }
            _ => interval,
        };
        Some(last.finished_at + wait)
    }

    pub fn is_due(&self, kind: &str, history: &[FinishedRun], now: DateTime<Utc>) -> bool {
        self.next_due_at(kind, history, now)
            .is_some_and(|due| now >= due)
    }
}

/// Upper bound for configured durations; keeps timestamp arithmetic in range.
const MAX_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SECONDS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RunPolicy {
        let mut intervals = BTreeMap::new();
        intervals.insert("okta".to_string(), Duration::minutes(15));
        intervals.insert("github".to_string(), Duration::hours(1));
        RunPolicy::new(intervals, Duration::minutes(5), Duration::hours(6), 10)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn due_without_history() {
        assert!(policy().is_due("okta", &[], t0()));
    }

    #[test]
    fn unconfigured_kind_is_never_due() {
        let p = policy();
        assert!(!p.is_due("slack", &[], t0()));
        assert_eq!(p.next_due_at("slack", &[], t0()), None);
    }

    #[test]
    fn okta_waits_out_interval_after_success() {
        let p = policy();
        let history = [FinishedRun::succeeded(t0())];
        assert!(!p.is_due("okta", &history, t0() + Duration::minutes(10)));
        assert!(p.is_due("okta", &history, t0() + Duration::minutes(15)));
        assert!(p.is_due("okta", &history, t0() + Duration::minutes(16)));
        assert_eq!(
            p.next_due_at("okta", &history, t0()),
            Some(t0() + Duration::minutes(15))
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_for(0), Duration::zero());
        assert_eq!(p.backoff_for(1), Duration::minutes(5));
        assert_eq!(p.backoff_for(2), Duration::minutes(10));
        assert_eq!(p.backoff_for(3), Duration::minutes(20));

        let mut prev = Duration::zero();
        for n in 1..=40 {
            let b = p.backoff_for(n);
            assert!(b >= prev);
            assert!(b <= Duration::hours(6));
            prev = b;
        }
        assert_eq!(p.backoff_for(40), Duration::hours(6));
    }

    #[test]
    fn failure_uses_backoff_not_interval() {
        let p = policy();
        let history = [FinishedRun::failed(t0())];
        assert!(!p.is_due("github", &history, t0() + Duration::minutes(4)));
        assert!(p.is_due("github", &history, t0() + Duration::minutes(5)));
    }

    #[test]
    fn consecutive_failures_count_until_last_success() {
        let p = policy();
        let history = [
            FinishedRun::failed(t0()),
            FinishedRun::failed(t0() - Duration::minutes(5)),
            FinishedRun::failed(t0() - Duration::minutes(10)),
            FinishedRun::succeeded(t0() - Duration::hours(2)),
            FinishedRun::failed(t0() - Duration::hours(3)),
        ];
        assert_eq!(
            p.next_due_at("github", &history, t0()),
            Some(t0() + Duration::minutes(20))
        );
    }

    #[test]
    fn failure_count_bounded_by_history_cap() {
        let mut intervals = BTreeMap::new();
        intervals.insert("okta".to_string(), Duration::minutes(15));
        let p = RunPolicy::new(intervals, Duration::minutes(1), Duration::hours(6), 2);
        let history: Vec<FinishedRun> = (0..5)
            .map(|i| FinishedRun::failed(t0() - Duration::minutes(i)))
            .collect();
        assert_eq!(
            p.next_due_at("okta", &history, t0()),
            Some(t0() + Duration::minutes(2))
        );
    }

    #[test]
    fn from_config_picks_lane_intervals() {
        let mut cfg = SyncConfig::default();
        cfg.intervals.insert("okta".into(), 900);
        cfg.discovery_intervals.insert("okta".into(), 60);
        let full = RunPolicy::from_config(&cfg, RunMode::Full);
        let discovery = RunPolicy::from_config(&cfg, RunMode::Discovery);
        assert_eq!(full.interval_for("okta"), Some(Duration::minutes(15)));
        assert_eq!(discovery.interval_for("okta"), Some(Duration::minutes(1)));
        assert_eq!(full.backoff_for(1), Duration::seconds(300));
        assert_eq!(full.history_cap(), 10);
    }
}
