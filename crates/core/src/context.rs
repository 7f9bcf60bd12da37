//! Cooperative cancellation for orchestration passes.
//!
//! A [`RunContext`] wraps a [`CancellationToken`] and remembers why it was
//! canceled, so the run driver can tell a lost lease apart from an operator
//! shutdown when it classifies an interrupted connector.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a context was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Process shutdown or operator interrupt.
    Shutdown,
    /// The scope lease could not be renewed.
    LockLost,
}

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context canceled together with `self`, which can also be canceled
    /// on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Cancel with a reason. The first reason recorded wins.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this context or any ancestor is canceled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The recorded reason, or `Shutdown` when cancellation came from a parent.
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        Some(self.reason.get().copied().unwrap_or(CancelReason::Shutdown))
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
