//! Payment saga orchestrator.
//!
//! Coordinates the authorize, process, settle flow across independent payment
//! services. Each payment is one saga instance, addressed by a correlation
//! key carried on every event. The orchestrator reacts to domain events,
//! emits the next command, and voids the authorization when a later step
//! fails or the saga's deadline expires.
//!
//! The pieces:
//! - `machine`: the pure transition table
//! - `SagaOrchestrator`: load, decide, dispatch, persist, per key
//! - `SagaRuntime`: a partitioned worker pool feeding the orchestrator
//! - collaborator traits (`CorrelationIndex`, `SagaRepository`,
//!   `CommandDispatcher`, `DeadlineScheduler`) with in-memory implementations

pub mod config;
pub mod context;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod machine;
pub mod orchestrator;
pub mod payment_saga;
pub mod repository;
pub mod runtime;
pub mod scheduler;
pub mod state;

pub use config::SagaConfig;
pub use context::SagaContext;
pub use correlation::{CorrelationIndex, InMemoryCorrelationIndex};
pub use dispatcher::{CommandAck, CommandDispatcher, InMemoryCommandDispatcher};
pub use error::{Result, SagaError};
pub use instance::{ArmedDeadline, ProcessedEvents, SagaInstance, TransitionRecord};
pub use machine::{Decision, Transition, Trigger};
pub use orchestrator::{DiscardReason, HandleOutcome, SagaHandler, SagaInput, SagaOrchestrator};
pub use repository::{InMemorySagaRepository, SagaRepository, SagaSnapshot};
pub use runtime::{EventStream, RuntimeStats, SagaRuntime};
pub use scheduler::{
    DeadlineElapsed, DeadlineScheduler, DeadlineToken, ManualDeadlineScheduler,
    TokioDeadlineScheduler,
};
pub use state::SagaState;
