//! Saga state machine states.

use serde::{Deserialize, Serialize};

/// The position of a payment saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──► AuthorizationPending ──┬──► ProcessingPending ──┬──► SettlementPending ──┬──► Completed
///                                    │                        │                       │
///                                    └──► Declined            └──► AuthorizationVoiding ◄┘
///                                                                        │
///                                                                        └──► Failed
/// ```
/// A deadline moves any non-terminal state to `AuthorizationVoiding` (or
/// straight to `Failed` when there is no authorization to void).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Saga instance created, start event not yet applied.
    #[default]
    Started,

    /// Waiting for the authorization result.
    AuthorizationPending,

    /// ProcessPayment sent, waiting for the processor.
    ProcessingPending,

    /// SettlePayment sent, waiting for settlement.
    SettlementPending,

    /// VoidAuthorization sent, waiting for the hold to be released.
    AuthorizationVoiding,

    /// Payment settled (terminal state).
    Completed,

    /// Authorization refused (terminal state).
    Declined,

    /// Payment unwound after a failure (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Declined | SagaState::Failed
        )
    }

    /// Returns true while a compensating void is outstanding.
    pub fn is_compensating(&self) -> bool {
        matches!(self, SagaState::AuthorizationVoiding)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "STARTED",
            SagaState::AuthorizationPending => "AUTHORIZATION_PENDING",
            SagaState::ProcessingPending => "PROCESSING_PENDING",
            SagaState::SettlementPending => "SETTLEMENT_PENDING",
            SagaState::AuthorizationVoiding => "AUTHORIZATION_VOIDING",
            SagaState::Completed => "COMPLETED",
            SagaState::Declined => "DECLINED",
            SagaState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
