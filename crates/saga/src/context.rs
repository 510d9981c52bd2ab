//! Transaction-scoped values accumulated by a saga.

use domain::{
    AuthorizationId, Currency, CustomerId, MerchantId, Money, PaymentEvent, ProcessingId,
    SettlementId,
};
use serde::{Deserialize, Serialize};

/// Values collected from the events a saga has applied.
///
/// Append-only: once a field is set it keeps its first value. A later event
/// carrying a different value for the same field is reported as a conflict
/// and otherwise ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaContext {
    pub customer_id: Option<CustomerId>,
    pub merchant_id: Option<MerchantId>,
    pub amount: Option<Money>,
    pub currency: Option<Currency>,
    pub authorization_id: Option<AuthorizationId>,
    pub processing_id: Option<ProcessingId>,
    pub settlement_id: Option<SettlementId>,
}

fn set_once<T: PartialEq>(
    slot: &mut Option<T>,
    value: T,
    field: &'static str,
    conflicts: &mut Vec<&'static str>,
) {
    match slot {
        Some(existing) if *existing != value => conflicts.push(field),
        Some(_) => {}
        None => *slot = Some(value),
    }
}

impl SagaContext {
    /// Records the values carried by `event`.
    ///
    /// Returns the names of fields whose existing value disagreed with the
    /// event; those fields are left unchanged.
    pub fn absorb(&mut self, event: &PaymentEvent) -> Vec<&'static str> {
        let mut conflicts = Vec::new();
        match event {
            PaymentEvent::PaymentInitiated(data) => {
                set_once(&mut self.customer_id, data.customer_id, "customer_id", &mut conflicts);
                set_once(
                    &mut self.merchant_id,
                    data.merchant_id.clone(),
                    "merchant_id",
                    &mut conflicts,
                );
                set_once(&mut self.amount, data.amount, "amount", &mut conflicts);
                set_once(
                    &mut self.currency,
                    data.currency.clone(),
                    "currency",
                    &mut conflicts,
                );
            }
            PaymentEvent::AuthorizationApproved(data) => {
                set_once(
                    &mut self.authorization_id,
                    data.authorization_id.clone(),
                    "authorization_id",
                    &mut conflicts,
                );
            }
            PaymentEvent::ProcessingSucceeded(data) => {
                set_once(
                    &mut self.processing_id,
                    data.processing_id.clone(),
                    "processing_id",
                    &mut conflicts,
                );
            }
            PaymentEvent::SettlementSucceeded(data) => {
                set_once(
                    &mut self.settlement_id,
                    data.settlement_id.clone(),
                    "settlement_id",
                    &mut conflicts,
                );
            }
            PaymentEvent::AuthorizationDeclined(_)
            | PaymentEvent::ProcessingFailed(_)
            | PaymentEvent::SettlementFailed(_)
            | PaymentEvent::AuthorizationVoided(_) => {}
        }
        conflicts
    }
}
