//! Orchestrator configuration loaded from environment variables.

use std::time::Duration;

use crate::payment_saga::{
    DEFAULT_COMPENSATION_DEADLINE, DEFAULT_DEADLINE, DEFAULT_PROCESSED_EVENT_CAPACITY,
};

/// Saga orchestrator and runtime settings.
///
/// Reads from environment variables:
/// - `SAGA_DEADLINE_SECS` (default: `300`)
/// - `SAGA_COMPENSATION_DEADLINE_SECS` (default: `300`)
/// - `SAGA_PROCESSED_EVENT_CAPACITY` (default: `64`)
/// - `SAGA_WORKERS` (default: `4`)
/// - `SAGA_WORKER_QUEUE_DEPTH` (default: `1024`)
/// - `SAGA_MAX_DELIVERY_ATTEMPTS` (default: `3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Time a saga may stay non-terminal, measured from its start.
    pub deadline: Duration,
    /// Time a deadline-triggered void may stay unanswered.
    pub compensation_deadline: Duration,
    /// Recent event IDs remembered per saga.
    pub processed_event_capacity: usize,
    /// Number of runtime workers.
    pub workers: usize,
    /// Bounded queue length per worker.
    pub worker_queue_depth: usize,
    /// Attempts per input before a retryable error is given up on.
    pub max_delivery_attempts: u32,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Missing or unparsable values fall back to their defaults. Counts are
    /// clamped to at least one.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            deadline: parse("SAGA_DEADLINE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.deadline),
            compensation_deadline: parse("SAGA_COMPENSATION_DEADLINE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compensation_deadline),
            processed_event_capacity: parse("SAGA_PROCESSED_EVENT_CAPACITY")
                .map(|v| v as usize)
                .unwrap_or(defaults.processed_event_capacity)
                .max(1),
            workers: parse("SAGA_WORKERS")
                .map(|v| v as usize)
                .unwrap_or(defaults.workers)
                .max(1),
            worker_queue_depth: parse("SAGA_WORKER_QUEUE_DEPTH")
                .map(|v| v as usize)
                .unwrap_or(defaults.worker_queue_depth)
                .max(1),
            max_delivery_attempts: parse("SAGA_MAX_DELIVERY_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_delivery_attempts)
                .max(1),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            compensation_deadline: DEFAULT_COMPENSATION_DEADLINE,
            processed_event_capacity: DEFAULT_PROCESSED_EVENT_CAPACITY,
            workers: 4,
            worker_queue_depth: 1024,
            max_delivery_attempts: 3,
        }
    }
}
