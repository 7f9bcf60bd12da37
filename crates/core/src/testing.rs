//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::connectors::{
    ConnectorDefinition, ConnectorInstance, ConnectorSettings, Integration, IntegrationRole,
    RunDeps, StaticSettings,
};
use crate::context::{CancelReason, RunContext};
use crate::db::sqlite::SqliteRepository;
use crate::db::DatabasePool;
use crate::error::{Result, WardenError};
use crate::models::identity::IdentityRecord;
use crate::models::sync::RunMode;
use crate::reporter::{Event, Reporter};
use crate::runner::RunOnce;

pub async fn memory_repo() -> Arc<SqliteRepository> {
    let pool = DatabasePool::new_sqlite_memory().await.unwrap();
    Arc::new(SqliteRepository::new(pool.into_sqlite()))
}

#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<Event>>,
}

impl MemoryReporter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// What a mock integration does when run.
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    #[default]
    Succeed,
    Write(Vec<IdentityRecord>),
    WriteThenFail(Vec<IdentityRecord>),
    Fail,
    CancelWith(CancelReason),
    WaitForCancel,
}

/// A connector kind whose integrations follow a scripted [`Behavior`].
/// Clones share the call counter.
#[derive(Debug, Clone)]
pub struct MockDefinition {
    kind: String,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl MockDefinition {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            behavior: Behavior::Succeed,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn behave(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConnectorDefinition for MockDefinition {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn display_name(&self) -> &str {
        "Mock"
    }

    fn role(&self) -> IntegrationRole {
        IntegrationRole::Idp
    }

    fn supports(&self, _mode: RunMode) -> bool {
        true
    }

    fn decode(&self, _raw: &toml::Table) -> Result<ConnectorSettings> {
        Ok(ConnectorSettings::Static(StaticSettings::default()))
    }

    fn validate(&self, _settings: &ConnectorSettings) -> Result<()> {
        Ok(())
    }

    fn is_configured(&self, _settings: &ConnectorSettings) -> bool {
        true
    }

    fn new_integration(
        &self,
        name: &str,
        _settings: &ConnectorSettings,
    ) -> Result<Box<dyn Integration>> {
        Ok(Box::new(MockIntegration {
            kind: self.kind.clone(),
            name: name.to_string(),
            behavior: self.behavior.clone(),
            calls: self.calls.clone(),
        }))
    }
}

pub fn instance(definition: &MockDefinition, name: &str) -> ConnectorInstance {
    ConnectorInstance {
        definition: Arc::new(definition.clone()),
        name: name.to_string(),
        enabled: true,
        settings: ConnectorSettings::Static(StaticSettings::default()),
    }
}

struct MockIntegration {
    kind: String,
    name: String,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Integration for MockIntegration {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> IntegrationRole {
        IntegrationRole::Idp
    }

    fn init_events(&self) -> Vec<Event> {
        vec![Event::stage(format!("{}/{}", self.kind, self.name), "mock")]
    }

    async fn run(&self, ctx: &RunContext, deps: &RunDeps) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Write(rows) => deps.write_identities(rows).await.map(|_| ()),
            Behavior::WriteThenFail(rows) => {
                deps.write_identities(rows).await?;
                Err(WardenError::Api("connection reset mid-page".into()))
            }
            Behavior::Fail => Err(WardenError::Api("upstream returned 401".into())),
            Behavior::CancelWith(reason) => {
                ctx.cancel(*reason);
                Err(WardenError::Canceled)
            }
            Behavior::WaitForCancel => {
                ctx.cancelled().await;
                Err(WardenError::Canceled)
            }
        }
    }
}

/// A [`RunOnce`] that counts invocations and can park each one on a gate.
pub struct CountingRunner {
    calls: AtomicUsize,
    changed: Notify,
    gate: Option<Semaphore>,
    fail: bool,
}

impl CountingRunner {
    pub fn open() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            changed: Notify::new(),
            gate: None,
            fail: false,
        }
    }

    /// Every invocation waits for a [`release`](Self::release) permit.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::open()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::open()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub async fn wait_for_calls(&self, n: usize) {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if self.calls() >= n {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} calls, saw {}", self.calls()));
    }
}

#[async_trait]
impl RunOnce for CountingRunner {
    async fn run_once(&self, _ctx: &RunContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail {
            return Err(WardenError::Integration("scripted failure".into()));
        }
        Ok(())
    }
}
