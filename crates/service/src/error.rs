//! Service error types.

use saga::SagaError;
use thiserror::Error;

/// Errors that stop the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The metrics exporter could not be installed.
    #[error("Metrics exporter error: {0}")]
    Metrics(String),

    /// The saga layer failed.
    #[error(transparent)]
    Saga(#[from] SagaError),
}
