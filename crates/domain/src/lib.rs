//! Domain layer for the payment saga.
//!
//! This crate provides the vocabulary the saga orchestrator speaks:
//! - `DomainEvent` / `DomainCommand` traits for typed messages
//! - Payment events consumed from the authorization, processing and
//!   settlement services
//! - Payment commands emitted back to those services
//! - Value objects shared by both

pub mod error;
pub mod message;
pub mod payment;

pub use error::DomainError;
pub use message::{DomainCommand, DomainEvent};
pub use payment::{
    AuthorizationApprovedData, AuthorizationDeclinedData, AuthorizationId, AuthorizationVoidedData,
    CommandId, Currency, CustomerId, InboundEvent, MerchantId, Money, PaymentCommand,
    PaymentEvent, PaymentInitiatedData, ProcessPaymentData, ProcessingFailedData, ProcessingId,
    ProcessingSucceededData, SettlePaymentData, SettlementFailedData, SettlementId,
    SettlementSucceededData, VoidAuthorizationData,
};
