//! Domain error types.

use thiserror::Error;

/// Errors raised while constructing domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Currency code is not a three-letter ISO 4217 code.
    #[error("Invalid currency code: {0:?} (expected three ASCII letters)")]
    InvalidCurrency(String),

    /// Monetary amount must be strictly positive.
    #[error("Invalid amount: {0} (must be greater than 0)")]
    InvalidAmount(i64),
}
