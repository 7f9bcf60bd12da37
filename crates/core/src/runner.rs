//! One orchestration pass over the configured connectors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::EvaluationMode;
use crate::connectors::{ConnectorInstance, RunDeps};
use crate::context::{CancelReason, RunContext};
use crate::db::repository::{SyncRunRepository, WardenRepository};
use crate::error::{Result, WardenError};
use crate::metrics::SyncMetrics;
use crate::models::identity::ExpiryCounts;
use crate::models::sync::{RunMode, SyncErrorKind, SyncRun};
use crate::policy::RunPolicy;
use crate::reporter::{Event, Reporter};

/// Anything the scheduler can drive once per tick.
#[async_trait]
pub trait RunOnce: Send + Sync {
    async fn run_once(&self, ctx: &RunContext) -> Result<()>;
}

/// Apply drift expiry for a finished run and mark it succeeded.
pub async fn finalize_app_run(
    repo: &dyn WardenRepository,
    run_id: &str,
    kind: &str,
    name: &str,
    mode: RunMode,
    duration: Duration,
    rows_written: i64,
) -> Result<ExpiryCounts> {
    let counts = repo
        .finalize_sync_run(run_id, kind, name, mode, millis(duration), rows_written)
        .await?;
    info!(
        run_id,
        kind,
        name,
        identities_expired = counts.identities,
        entitlements_expired = counts.entitlements,
        "Sync run finalized"
    );
    Ok(counts)
}

/// Record a failed run. Returns false if the run had already finished.
pub async fn fail_sync_run(
    repo: &dyn WardenRepository,
    run_id: &str,
    err: &WardenError,
    kind: SyncErrorKind,
    duration: Option<Duration>,
) -> Result<bool> {
    let updated = repo
        .fail_sync_run(run_id, kind, &err.to_string(), duration.map(millis))
        .await?;
    if !updated {
        warn!(run_id, "Sync run was already terminal; failure not recorded");
    }
    Ok(updated)
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// What happened to one connector during a pass.
#[derive(Debug)]
pub enum ConnectorOutcome {
    Skipped,
    Succeeded(ExpiryCounts),
    Failed(WardenError),
}

/// Per-pass tallies, returned by [`DbRunner::run_pass`].
#[derive(Debug, Default)]
pub struct PassReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, WardenError)>,
}

impl PassReport {
    fn into_result(self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = self.failed.iter().map(|(n, _)| n.as_str()).collect();
        Err(WardenError::PartialFailure {
            failed: self.failed.len(),
            names: names.join(", "),
        })
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Drives every runnable connector for one run mode through a sync run.
pub struct DbRunner {
    repo: Arc<dyn WardenRepository>,
    connectors: Vec<ConnectorInstance>,
    policy: RunPolicy,
    mode: RunMode,
    evaluation: EvaluationMode,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<SyncMetrics>,
    clock: Clock,
}

impl DbRunner {
    pub fn new(
        repo: Arc<dyn WardenRepository>,
        connectors: Vec<ConnectorInstance>,
        policy: RunPolicy,
        mode: RunMode,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            repo,
            connectors,
            policy,
            mode,
            evaluation: EvaluationMode::default(),
            reporter,
            metrics: Arc::new(SyncMetrics::new()),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationMode) -> Self {
        self.evaluation = evaluation;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the clock used for due checks.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Run every due connector in configuration order.
    ///
    /// Strict evaluation stops at the first failure and returns it. Best
    /// effort records the failure and moves on. Cancellation stops the pass
    /// before the next connector in either mode.
    pub async fn run_pass(&self, ctx: &RunContext) -> Result<PassReport> {
        let mut report = PassReport::default();

        for instance in self.connectors.iter().filter(|c| c.is_runnable(self.mode)) {
            if ctx.is_cancelled() {
                return Err(self.cancel_error(ctx));
            }

            let label = format!("{}/{}", instance.kind(), instance.name);
            match self.run_connector(ctx, instance).await {
                ConnectorOutcome::Skipped => report.skipped.push(label),
                ConnectorOutcome::Succeeded(_) => report.succeeded.push(label),
                ConnectorOutcome::Failed(err) => {
                    if ctx.is_cancelled() {
                        return Err(err);
                    }
                    if self.evaluation == EvaluationMode::Strict {
                        error!(connector = %label, error = %err, "Aborting pass in strict mode");
                        return Err(err);
                    }
                    report.failed.push((label, err));
                }
            }
        }

        info!(
            mode = %self.mode,
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Load history, decide, and if due run one connector end to end.
    pub async fn run_connector(
        &self,
        ctx: &RunContext,
        instance: &ConnectorInstance,
    ) -> ConnectorOutcome {
        let kind = instance.kind();
        let name = instance.name.as_str();

        let history = match self
            .repo
            .recent_finished_runs(kind, name, self.mode, self.policy.history_cap())
            .await
        {
            Ok(h) => h,
            Err(e) => {
                error!(kind, name, error = %e, "Failed to load run history");
                self.metrics
                    .record_failure(kind, name, self.mode, Duration::ZERO, e.kind());
                return ConnectorOutcome::Failed(e);
            }
        };

        let now = (self.clock)();
        if !self.policy.is_due(kind, &history, now) {
            info!(
                kind,
                name,
                next_due_at = ?self.policy.next_due_at(kind, &history, now),
                "Skipping connector; not due"
            );
            return ConnectorOutcome::Skipped;
        }

        let run = match self.repo.create_sync_run(kind, name, self.mode).await {
            Ok(run) => run,
            Err(e) => {
                error!(kind, name, error = %e, "Failed to open sync run");
                self.metrics
                    .record_failure(kind, name, self.mode, Duration::ZERO, e.kind());
                return ConnectorOutcome::Failed(e);
            }
        };
        info!(run_id = %run.id, kind, name, mode = %self.mode, "Starting sync run");

        let started = Instant::now();
        let result = self.execute(ctx, instance, &run).await;
        let elapsed = started.elapsed();

        match result {
            Ok(rows_written) if !ctx.is_cancelled() => {
                match finalize_app_run(
                    self.repo.as_ref(),
                    &run.id,
                    kind,
                    name,
                    self.mode,
                    elapsed,
                    rows_written,
                )
                .await
                {
                    Ok(counts) => {
                        self.metrics
                            .record_success(kind, name, self.mode, elapsed, counts.total());
                        ConnectorOutcome::Succeeded(counts)
                    }
                    Err(e) => self.fail(&run, e, SyncErrorKind::Db, elapsed).await,
                }
            }
            Ok(_) => {
                let err = self.cancel_error(ctx);
                let error_kind = err.kind();
                self.fail(&run, err, error_kind, elapsed).await
            }
            Err(e) => {
                let error_kind = classify(ctx, &e);
                let err = if ctx.is_cancelled() {
                    self.cancel_error(ctx)
                } else {
                    e
                };
                self.fail(&run, err, error_kind, elapsed).await
            }
        }
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        instance: &ConnectorInstance,
        run: &SyncRun,
    ) -> Result<i64> {
        let integration = instance.new_integration()?;
        for event in integration.init_events() {
            self.reporter.report(&event);
        }
        let deps = RunDeps::new(self.repo.clone(), self.reporter.clone(), run);
        integration.run(ctx, &deps).await?;
        Ok(deps.rows_written())
    }

    async fn fail(
        &self,
        run: &SyncRun,
        err: WardenError,
        kind: SyncErrorKind,
        elapsed: Duration,
    ) -> ConnectorOutcome {
        error!(
            run_id = %run.id,
            kind = %run.source_kind,
            name = %run.source_name,
            error_kind = %kind,
            error = %err,
            "Sync run failed"
        );
        self.reporter.report(
            &Event::stage(format!("{}/{}", run.source_kind, run.source_name), "run")
                .with_error(err.to_string()),
        );
        if let Err(e) =
            fail_sync_run(self.repo.as_ref(), &run.id, &err, kind, Some(elapsed)).await
        {
            error!(run_id = %run.id, error = %e, "Failed to record sync run failure");
        }
        self.metrics
            .record_failure(&run.source_kind, &run.source_name, run.mode, elapsed, kind);
        ConnectorOutcome::Failed(err)
    }

    fn cancel_error(&self, ctx: &RunContext) -> WardenError {
        match ctx.reason() {
            Some(CancelReason::LockLost) => WardenError::LockLost(self.mode.lock_scope().into()),
            _ => WardenError::Canceled,
        }
    }
}

/// Classify a connector error, letting the cancel reason win when the run was
/// interrupted.
pub fn classify(ctx: &RunContext, err: &WardenError) -> SyncErrorKind {
    match ctx.reason() {
        Some(CancelReason::LockLost) => SyncErrorKind::LockLost,
        Some(CancelReason::Shutdown) => SyncErrorKind::Canceled,
        None => err.kind(),
    }
}

#[async_trait]
impl RunOnce for DbRunner {
    async fn run_once(&self, ctx: &RunContext) -> Result<()> {
        self.run_pass(ctx).await?.into_result()
    }
}
