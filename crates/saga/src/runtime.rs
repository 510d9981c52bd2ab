//! Worker pool feeding inputs to a saga handler.
//!
//! Inputs are partitioned by correlation key: every input for a key goes to
//! the same worker and is handled in arrival order, while different keys are
//! spread across workers and run in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use common::CorrelationKey;
use domain::InboundEvent;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::orchestrator::{SagaHandler, SagaInput};
use crate::scheduler::DeadlineElapsed;

/// A stream of inbound events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<InboundEvent>> + Send>>;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Counters kept by the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Inputs the handler accepted, whatever the outcome.
    pub handled: u64,
    /// Inputs given up on after an error.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    handled: AtomicU64,
    failed: AtomicU64,
    closing: AtomicBool,
}

impl Counters {
    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn partition(key: &CorrelationKey, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(RETRY_MAX_DELAY)
}

// Deadline inputs ignore the attempt cap and retry until shutdown.
fn retries_until_shutdown(input: &SagaInput) -> bool {
    matches!(input, SagaInput::Deadline(_))
}

async fn deliver<H: SagaHandler + ?Sized>(
    handler: &H,
    input: SagaInput,
    max_attempts: u32,
    counters: &Counters,
) {
    let name = input.name();
    let mut attempt = 1;
    loop {
        match handler.handle(input.clone()).await {
            Ok(outcome) => {
                counters.handled.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(input = name, ?outcome, "input handled");
                return;
            }
            Err(err)
                if err.is_retryable()
                    && (attempt < max_attempts
                        || (retries_until_shutdown(&input)
                            && !counters.closing.load(Ordering::Relaxed))) =>
            {
                tracing::warn!(
                    input = name,
                    correlation_key = %input.correlation_key(),
                    attempt,
                    error = %err,
                    "input failed, retrying"
                );
                tokio::time::sleep(retry_delay(attempt)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("saga_inputs_failed_total").increment(1);
                tracing::error!(
                    input = name,
                    correlation_key = %input.correlation_key(),
                    attempt,
                    error = %err,
                    "input dropped after error"
                );
                return;
            }
        }
    }
}

/// A running pool of saga workers.
pub struct SagaRuntime {
    senders: Vec<mpsc::Sender<SagaInput>>,
    workers: Vec<JoinHandle<()>>,
    forwarders: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl SagaRuntime {
    /// Spawns `config.workers` workers around `handler`.
    pub fn start<H>(handler: Arc<H>, config: &SagaConfig) -> Self
    where
        H: SagaHandler + 'static,
    {
        let counters = Arc::new(Counters::default());
        let worker_count = config.workers.max(1);
        let max_attempts = config.max_delivery_attempts.max(1);

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<SagaInput>(config.worker_queue_depth.max(1));
            let handler = Arc::clone(&handler);
            let counters = Arc::clone(&counters);
            workers.push(tokio::spawn(async move {
                tracing::debug!(worker, "saga worker started");
                while let Some(input) = rx.recv().await {
                    deliver(handler.as_ref(), input, max_attempts, &counters).await;
                }
                tracing::debug!(worker, "saga worker stopped");
            }));
            senders.push(tx);
        }

        tracing::info!(workers = worker_count, max_attempts, "saga runtime started");
        Self {
            senders,
            workers,
            forwarders: Vec::new(),
            counters,
        }
    }

    /// Returns the number of workers.
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Returns the current counters.
    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }

    /// Routes expired deadlines from `deadlines` to the owning workers.
    pub fn attach_deadlines(&mut self, mut deadlines: mpsc::Receiver<DeadlineElapsed>) {
        let senders = self.senders.clone();
        self.forwarders.push(tokio::spawn(async move {
            while let Some(elapsed) = deadlines.recv().await {
                let worker = partition(&elapsed.correlation_key, senders.len());
                if senders[worker]
                    .send(SagaInput::Deadline(elapsed))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    /// Queues one input on the worker owning its correlation key.
    ///
    /// Waits while that worker's queue is full.
    pub async fn submit(&self, input: SagaInput) -> Result<()> {
        let worker = partition(input.correlation_key(), self.senders.len());
        self.senders[worker]
            .send(input)
            .await
            .map_err(|_| SagaError::Shutdown)
    }

    /// Feeds every event of `events` to the workers until the stream ends.
    ///
    /// Stream errors are logged and skipped. Returns the number of events
    /// submitted.
    #[tracing::instrument(skip(self, events))]
    pub async fn run(&self, mut events: EventStream) -> Result<u64> {
        let mut submitted: u64 = 0;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    self.submit(SagaInput::Event(event)).await?;
                    submitted += 1;
                }
                Err(err) => {
                    metrics::counter!("saga_inputs_discarded_total", "reason" => "unreadable")
                        .increment(1);
                    tracing::warn!(error = %err, "skipping unreadable input");
                }
            }
        }
        tracing::info!(submitted, "event stream ended");
        Ok(submitted)
    }

    /// Stops accepting input, drains the queues and waits for the workers.
    ///
    /// A deadline still failing at this point is dropped; its token stays on
    /// the saga, so `recover_deadlines` re-arms it on the next start.
    pub async fn shutdown(self) -> RuntimeStats {
        self.counters.closing.store(true, Ordering::Relaxed);
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
        for forwarder in self.forwarders {
            let _ = forwarder.await;
        }
        drop(self.senders);
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "saga worker panicked");
            }
        }
        let stats = self.counters.snapshot();
        tracing::info!(handled = stats.handled, failed = stats.failed, "saga runtime stopped");
        stats
    }
}
