//! Payment events, commands and value objects.

mod commands;
mod events;
mod value_objects;

pub use commands::{
    CommandId, PaymentCommand, ProcessPaymentData, SettlePaymentData, VoidAuthorizationData,
};
pub use events::{
    AuthorizationApprovedData, AuthorizationDeclinedData, AuthorizationVoidedData, InboundEvent,
    PaymentEvent, PaymentInitiatedData, ProcessingFailedData, ProcessingSucceededData,
    SettlementFailedData, SettlementSucceededData,
};
pub use value_objects::{
    AuthorizationId, Currency, CustomerId, MerchantId, Money, ProcessingId, SettlementId,
};
