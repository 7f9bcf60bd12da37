//! Progress events emitted by integrations and the run driver.

use tracing::{info, warn};

/// `total` value for progress without a known upper bound.
pub const UNKNOWN_TOTAL: i64 = -1;

/// One progress report from a connector stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub source: String,
    pub stage: String,
    pub current: i64,
    pub total: i64,
    pub message: Option<String>,
    pub err: Option<String>,
}

impl Event {
    /// A stage announcement with no progress yet.
    pub fn stage(source: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stage: stage.into(),
            current: 0,
            total: UNKNOWN_TOTAL,
            message: None,
            err: None,
        }
    }

    pub fn progress(mut self, current: i64, total: i64) -> Self {
        self.current = current;
        self.total = total;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, err: impl Into<String>) -> Self {
        self.err = Some(err.into());
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.total == UNKNOWN_TOTAL
    }
}

/// Sink for progress events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: &Event);
}

/// Writes every event to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: &Event) {
        let total = if event.is_unbounded() {
            "?".to_string()
        } else {
            event.total.to_string()
        };
        match &event.err {
            Some(err) => warn!(
                source = %event.source,
                stage = %event.stage,
                current = event.current,
                total = %total,
                error = %err,
                "sync stage failed"
            ),
            None => info!(
                source = %event.source,
                stage = %event.stage,
                current = event.current,
                total = %total,
                message = event.message.as_deref().unwrap_or(""),
                "sync progress"
            ),
        }
    }
}
