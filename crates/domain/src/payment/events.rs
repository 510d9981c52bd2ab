//! Payment domain events consumed by the saga.

use chrono::{DateTime, Utc};
use common::{CorrelationKey, EventId};
use serde::{Deserialize, Serialize};

use crate::message::DomainEvent;

use super::{AuthorizationId, Currency, CustomerId, MerchantId, Money, ProcessingId, SettlementId};

/// Events published by the payment services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    /// A customer initiated a payment. Starts a saga.
    PaymentInitiated(PaymentInitiatedData),

    /// The authorization service placed a hold on the funds.
    AuthorizationApproved(AuthorizationApprovedData),

    /// The authorization service refused the payment.
    AuthorizationDeclined(AuthorizationDeclinedData),

    /// The processor captured the authorized funds.
    ProcessingSucceeded(ProcessingSucceededData),

    /// The processor could not capture the funds.
    ProcessingFailed(ProcessingFailedData),

    /// Funds were settled to the merchant.
    SettlementSucceeded(SettlementSucceededData),

    /// Settlement to the merchant failed.
    SettlementFailed(SettlementFailedData),

    /// The authorization hold was released.
    AuthorizationVoided(AuthorizationVoidedData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentInitiated(_) => "PaymentInitiated",
            PaymentEvent::AuthorizationApproved(_) => "AuthorizationApproved",
            PaymentEvent::AuthorizationDeclined(_) => "AuthorizationDeclined",
            PaymentEvent::ProcessingSucceeded(_) => "ProcessingSucceeded",
            PaymentEvent::ProcessingFailed(_) => "ProcessingFailed",
            PaymentEvent::SettlementSucceeded(_) => "SettlementSucceeded",
            PaymentEvent::SettlementFailed(_) => "SettlementFailed",
            PaymentEvent::AuthorizationVoided(_) => "AuthorizationVoided",
        }
    }
}

impl PaymentEvent {
    /// Returns true for the event that opens a new saga.
    pub fn is_start(&self) -> bool {
        matches!(self, PaymentEvent::PaymentInitiated(_))
    }
}

/// Data for PaymentInitiated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiatedData {
    /// The paying customer.
    pub customer_id: CustomerId,
    /// The merchant being paid.
    pub merchant_id: MerchantId,
    /// Amount to charge.
    pub amount: Money,
    /// Currency of the amount.
    pub currency: Currency,
}

/// Data for AuthorizationApproved event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationApprovedData {
    /// The hold placed on the customer's funds.
    pub authorization_id: AuthorizationId,
}

/// Data for AuthorizationDeclined event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDeclinedData {
    /// Why the authorization was refused.
    pub reason: String,
}

/// Data for ProcessingSucceeded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSucceededData {
    /// Processor reference for the captured funds.
    pub processing_id: ProcessingId,
}

/// Data for ProcessingFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFailedData {
    /// Why processing failed.
    pub reason: String,
}

/// Data for SettlementSucceeded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSucceededData {
    /// Settlement reference.
    pub settlement_id: SettlementId,
}

/// Data for SettlementFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailedData {
    /// Why settlement failed.
    pub reason: String,
}

/// Data for AuthorizationVoided event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationVoidedData {
    /// The hold that was released.
    pub authorization_id: AuthorizationId,
}

// Convenience constructors
impl PaymentEvent {
    /// Creates a PaymentInitiated event.
    pub fn payment_initiated(
        customer_id: CustomerId,
        merchant_id: impl Into<MerchantId>,
        amount: Money,
        currency: Currency,
    ) -> Self {
        PaymentEvent::PaymentInitiated(PaymentInitiatedData {
            customer_id,
            merchant_id: merchant_id.into(),
            amount,
            currency,
        })
    }

    /// Creates an AuthorizationApproved event.
    pub fn authorization_approved(authorization_id: impl Into<AuthorizationId>) -> Self {
        PaymentEvent::AuthorizationApproved(AuthorizationApprovedData {
            authorization_id: authorization_id.into(),
        })
    }

    /// Creates an AuthorizationDeclined event.
    pub fn authorization_declined(reason: impl Into<String>) -> Self {
        PaymentEvent::AuthorizationDeclined(AuthorizationDeclinedData {
            reason: reason.into(),
        })
    }

    /// Creates a ProcessingSucceeded event.
    pub fn processing_succeeded(processing_id: impl Into<ProcessingId>) -> Self {
        PaymentEvent::ProcessingSucceeded(ProcessingSucceededData {
            processing_id: processing_id.into(),
        })
    }

    /// Creates a ProcessingFailed event.
    pub fn processing_failed(reason: impl Into<String>) -> Self {
        PaymentEvent::ProcessingFailed(ProcessingFailedData {
            reason: reason.into(),
        })
    }

    /// Creates a SettlementSucceeded event.
    pub fn settlement_succeeded(settlement_id: impl Into<SettlementId>) -> Self {
        PaymentEvent::SettlementSucceeded(SettlementSucceededData {
            settlement_id: settlement_id.into(),
        })
    }

    /// Creates a SettlementFailed event.
    pub fn settlement_failed(reason: impl Into<String>) -> Self {
        PaymentEvent::SettlementFailed(SettlementFailedData {
            reason: reason.into(),
        })
    }

    /// Creates an AuthorizationVoided event.
    pub fn authorization_voided(authorization_id: impl Into<AuthorizationId>) -> Self {
        PaymentEvent::AuthorizationVoided(AuthorizationVoidedData {
            authorization_id: authorization_id.into(),
        })
    }
}

/// A payment event as delivered by the transport.
///
/// The envelope carries what the orchestrator needs for routing and
/// duplicate detection; the payload is only interpreted by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Producer-assigned ID, stable across redeliveries.
    pub event_id: EventId,

    /// Routes the event to its saga instance.
    pub correlation_key: CorrelationKey,

    /// When the producer recorded the event.
    pub occurred_at: DateTime<Utc>,

    /// The event payload.
    pub event: PaymentEvent,
}

impl InboundEvent {
    /// Wraps an event with a fresh event ID and the current time.
    pub fn new(correlation_key: impl Into<CorrelationKey>, event: PaymentEvent) -> Self {
        Self {
            event_id: EventId::new(),
            correlation_key: correlation_key.into(),
            occurred_at: Utc::now(),
            event,
        }
    }

    /// Returns the same envelope with a fixed event ID, as a redelivery would carry.
    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    /// Returns the payload's event type name.
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}
