//! Payment saga service.
//!
//! Reads `InboundEvent`s as JSON lines, drives them through the saga
//! orchestrator and writes the resulting `PaymentCommand`s as JSON lines.
//! Logs go to stderr; metrics are exposed for Prometheus scraping.

pub mod config;
pub mod error;
pub mod stdio;

use std::sync::Arc;

use saga::{
    CommandDispatcher, InMemoryCorrelationIndex, InMemorySagaRepository, SagaConfig,
    SagaOrchestrator, SagaRuntime, TokioDeadlineScheduler,
};

pub use config::{Config, LogFormat};
pub use error::ServiceError;

/// The orchestrator wired with in-process storage and tokio timers.
pub type ServiceOrchestrator<D> = SagaOrchestrator<
    InMemoryCorrelationIndex,
    InMemorySagaRepository,
    D,
    TokioDeadlineScheduler,
>;

/// Builds the orchestrator and a running worker pool around it.
///
/// Deadline expirations are routed into the same pool as events.
pub fn start<D>(dispatcher: D, config: &SagaConfig) -> (Arc<ServiceOrchestrator<D>>, SagaRuntime)
where
    D: CommandDispatcher + 'static,
{
    let (scheduler, deadlines) = TokioDeadlineScheduler::new(config.worker_queue_depth);
    let orchestrator = Arc::new(SagaOrchestrator::new(
        InMemoryCorrelationIndex::new(),
        InMemorySagaRepository::new(),
        dispatcher,
        scheduler,
        config.clone(),
    ));
    let mut runtime = SagaRuntime::start(Arc::clone(&orchestrator), config);
    runtime.attach_deadlines(deadlines);
    (orchestrator, runtime)
}
