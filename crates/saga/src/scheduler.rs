//! Deadline scheduling for saga instances.
//!
//! Every non-terminal saga has exactly one armed deadline. When it expires the
//! scheduler emits a `DeadlineElapsed` input, which the orchestrator applies
//! through the same path as a domain event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationKey, SagaId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Result, SagaError};

/// Opaque handle to one armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeadlineToken(Uuid);

impl DeadlineToken {
    /// Creates a new unique token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeadlineToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeadlineToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synthetic input produced when a deadline expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineElapsed {
    pub saga_id: SagaId,
    pub correlation_key: CorrelationKey,
    /// Token of the deadline that fired; stale if it no longer matches the saga.
    pub token: DeadlineToken,
    pub fired_at: DateTime<Utc>,
}

/// Arms and disarms per-saga deadlines.
#[async_trait]
pub trait DeadlineScheduler: Send + Sync {
    /// Arms a deadline firing after `after`.
    ///
    /// A saga has at most one armed deadline. Arming an already-armed saga is
    /// a programming error: it is logged and the existing token is returned.
    async fn arm(
        &self,
        saga_id: SagaId,
        correlation_key: &CorrelationKey,
        after: Duration,
    ) -> Result<DeadlineToken>;

    /// Cancels the saga's deadline. No-op if none is armed.
    async fn disarm(&self, saga_id: SagaId);
}

struct ArmedTimer {
    token: DeadlineToken,
    task: JoinHandle<()>,
}

/// Deadline scheduler backed by one sleeping tokio task per armed deadline.
///
/// Expired deadlines are sent on the channel returned by `new`; the runtime
/// forwards them to the worker owning the saga's correlation key.
#[derive(Clone)]
pub struct TokioDeadlineScheduler {
    timers: Arc<tokio::sync::Mutex<HashMap<SagaId, ArmedTimer>>>,
    tx: mpsc::Sender<DeadlineElapsed>,
}

impl TokioDeadlineScheduler {
    /// Creates a scheduler and the receiver its expirations are delivered on.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<DeadlineElapsed>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let scheduler = Self {
            timers: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            tx,
        };
        (scheduler, rx)
    }

    /// Returns the number of currently armed deadlines.
    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[async_trait]
impl DeadlineScheduler for TokioDeadlineScheduler {
    async fn arm(
        &self,
        saga_id: SagaId,
        correlation_key: &CorrelationKey,
        after: Duration,
    ) -> Result<DeadlineToken> {
        if self.tx.is_closed() {
            return Err(SagaError::Scheduler(
                "deadline receiver closed, expiries would be lost".to_string(),
            ));
        }
        let mut timers = self.timers.lock().await;
        if let Some(existing) = timers.get(&saga_id) {
            tracing::error!(%saga_id, token = %existing.token, "deadline already armed");
            return Ok(existing.token);
        }

        let token = DeadlineToken::new();
        let elapsed = DeadlineElapsed {
            saga_id,
            correlation_key: correlation_key.clone(),
            token,
            fired_at: Utc::now(),
        };
        let timers_ref = Arc::clone(&self.timers);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            {
                let mut timers = timers_ref.lock().await;
                if timers.get(&saga_id).is_some_and(|t| t.token == token) {
                    timers.remove(&saga_id);
                }
            }
            let elapsed = DeadlineElapsed {
                fired_at: Utc::now(),
                ..elapsed
            };
            if tx.send(elapsed).await.is_err() {
                tracing::debug!(%saga_id, "deadline receiver closed, dropping expiry");
            }
        });

        tracing::debug!(%saga_id, %token, after_secs = after.as_secs_f64(), "deadline armed");
        timers.insert(saga_id, ArmedTimer { token, task });
        Ok(token)
    }

    async fn disarm(&self, saga_id: SagaId) {
        if let Some(timer) = self.timers.lock().await.remove(&saga_id) {
            timer.task.abort();
            tracing::debug!(%saga_id, token = %timer.token, "deadline disarmed");
        }
    }
}

#[derive(Debug, Clone)]
struct ManualDeadline {
    token: DeadlineToken,
    correlation_key: CorrelationKey,
    after: Duration,
}

#[derive(Debug, Default)]
struct ManualSchedulerState {
    armed: HashMap<SagaId, ManualDeadline>,
    arm_calls: usize,
}

/// Deadline scheduler that never fires on its own.
///
/// Tests inspect what is armed and call `fire` to simulate expiry.
#[derive(Debug, Clone, Default)]
pub struct ManualDeadlineScheduler {
    state: Arc<Mutex<ManualSchedulerState>>,
}

impl ManualDeadlineScheduler {
    /// Creates a new manual scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token armed for `saga_id`, if any.
    pub fn armed(&self, saga_id: SagaId) -> Option<DeadlineToken> {
        self.state.lock().unwrap().armed.get(&saga_id).map(|d| d.token)
    }

    /// Returns the duration the saga's deadline was armed with.
    pub fn armed_after(&self, saga_id: SagaId) -> Option<Duration> {
        self.state.lock().unwrap().armed.get(&saga_id).map(|d| d.after)
    }

    /// Returns the number of armed deadlines.
    pub fn armed_count(&self) -> usize {
        self.state.lock().unwrap().armed.len()
    }

    /// Returns how many times `arm` was called.
    pub fn arm_calls(&self) -> usize {
        self.state.lock().unwrap().arm_calls
    }

    /// Expires the saga's deadline, returning the input to feed the orchestrator.
    pub fn fire(&self, saga_id: SagaId) -> Option<DeadlineElapsed> {
        let deadline = self.state.lock().unwrap().armed.remove(&saga_id)?;
        Some(DeadlineElapsed {
            saga_id,
            correlation_key: deadline.correlation_key,
            token: deadline.token,
            fired_at: Utc::now(),
        })
    }
}

#[async_trait]
impl DeadlineScheduler for ManualDeadlineScheduler {
    async fn arm(
        &self,
        saga_id: SagaId,
        correlation_key: &CorrelationKey,
        after: Duration,
    ) -> Result<DeadlineToken> {
        let mut state = self.state.lock().unwrap();
        state.arm_calls += 1;
        if let Some(existing) = state.armed.get(&saga_id) {
            tracing::error!(%saga_id, token = %existing.token, "deadline already armed");
            return Ok(existing.token);
        }
        let token = DeadlineToken::new();
        state.armed.insert(
            saga_id,
            ManualDeadline {
                token,
                correlation_key: correlation_key.clone(),
                after,
            },
        );
        Ok(token)
    }

    async fn disarm(&self, saga_id: SagaId) {
        self.state.lock().unwrap().armed.remove(&saga_id);
    }
}
