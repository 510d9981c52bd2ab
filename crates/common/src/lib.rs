//! Shared identifier types used across the payment saga workspace.

mod types;

pub use types::{CorrelationKey, EventId, SagaId, Version};
