//! Payment commands emitted by the saga.

use common::{CorrelationKey, SagaId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::DomainCommand;

use super::{AuthorizationId, Currency, MerchantId, Money, ProcessingId};

/// Idempotency key attached to every emitted command.
///
/// Derived deterministically from the saga and the step that emits the
/// command, so a command re-sent after a redelivered event carries the same
/// ID and the receiving service can drop the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Derives the command ID for a (saga, step) pair.
    pub fn for_step(saga_id: SagaId, step: &str) -> Self {
        Self(Uuid::new_v5(&saga_id.as_uuid(), step.as_bytes()))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commands the saga sends to the payment services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentCommand {
    /// Capture authorized funds.
    ProcessPayment(ProcessPaymentData),

    /// Settle processed funds to the merchant.
    SettlePayment(SettlePaymentData),

    /// Release an authorization hold (compensation).
    VoidAuthorization(VoidAuthorizationData),
}

impl DomainCommand for PaymentCommand {
    fn command_type(&self) -> &'static str {
        match self {
            PaymentCommand::ProcessPayment(_) => "ProcessPayment",
            PaymentCommand::SettlePayment(_) => "SettlePayment",
            PaymentCommand::VoidAuthorization(_) => "VoidAuthorization",
        }
    }
}

impl PaymentCommand {
    /// Returns the idempotency key of the command.
    pub fn command_id(&self) -> CommandId {
        match self {
            PaymentCommand::ProcessPayment(data) => data.command_id,
            PaymentCommand::SettlePayment(data) => data.command_id,
            PaymentCommand::VoidAuthorization(data) => data.command_id,
        }
    }

    /// Returns the correlation key of the payment the command belongs to.
    pub fn correlation_key(&self) -> &CorrelationKey {
        match self {
            PaymentCommand::ProcessPayment(data) => &data.correlation_key,
            PaymentCommand::SettlePayment(data) => &data.correlation_key,
            PaymentCommand::VoidAuthorization(data) => &data.correlation_key,
        }
    }

    /// Returns true for the compensating command.
    pub fn is_compensation(&self) -> bool {
        matches!(self, PaymentCommand::VoidAuthorization(_))
    }
}

/// Data for ProcessPayment command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPaymentData {
    /// Idempotency key.
    pub command_id: CommandId,
    /// The payment being processed.
    pub correlation_key: CorrelationKey,
    /// The authorization to capture against.
    pub authorization_id: AuthorizationId,
    /// Amount to capture.
    pub amount: Money,
    /// Currency of the amount.
    pub currency: Currency,
}

/// Data for SettlePayment command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlePaymentData {
    /// Idempotency key.
    pub command_id: CommandId,
    /// The payment being settled.
    pub correlation_key: CorrelationKey,
    /// Processor reference of the captured funds.
    pub processing_id: ProcessingId,
    /// Merchant receiving the funds.
    pub merchant_id: MerchantId,
    /// Amount to settle.
    pub amount: Money,
}

/// Data for VoidAuthorization command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidAuthorizationData {
    /// Idempotency key.
    pub command_id: CommandId,
    /// The payment being unwound.
    pub correlation_key: CorrelationKey,
    /// The hold to release.
    pub authorization_id: AuthorizationId,
    /// Why the authorization is being voided.
    pub reason: String,
}
