//! The payment saga transition table.
//!
//! `decide` is a pure function of the saga instance and the incoming trigger.
//! It performs no I/O; the orchestrator carries out whatever it returns.

use domain::{
    CommandId, PaymentCommand, PaymentEvent, ProcessPaymentData, SettlePaymentData,
    VoidAuthorizationData,
};

use crate::context::SagaContext;
use crate::instance::SagaInstance;
use crate::payment_saga::{STEP_PROCESS_PAYMENT, STEP_SETTLE_PAYMENT, STEP_VOID_AUTHORIZATION};
use crate::state::SagaState;

/// Trigger name used for deadline expiry in logs and history.
pub const DEADLINE_ELAPSED: &str = "DeadlineElapsed";

/// History trigger recorded when a compensating void could not be sent.
pub const VOID_DISPATCH_FAILED: &str = "VoidDispatchFailed";

/// Something that can move a saga.
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    /// A domain event delivered by the transport.
    Event(&'a PaymentEvent),
    /// The saga's deadline expired.
    DeadlineElapsed,
}

impl Trigger<'_> {
    /// Returns the trigger name.
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Event(event) => domain::DomainEvent::event_type(*event),
            Trigger::DeadlineElapsed => DEADLINE_ELAPSED,
        }
    }
}

/// A state change and its effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SagaState,
    pub to: SagaState,
    /// Context after absorbing the triggering event.
    pub context: SagaContext,
    /// Command to emit, if any.
    pub command: Option<PaymentCommand>,
    /// Why the saga is ending without completing.
    pub reason: Option<String>,
    /// True when the saga ends with a void that was never confirmed.
    pub compensation_unresolved: bool,
    /// Context fields the event tried to overwrite.
    pub context_conflicts: Vec<&'static str>,
}

/// Outcome of evaluating a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Apply this transition.
    Apply(Transition),
    /// No edge from the current state: duplicate or out-of-order delivery.
    Ignore,
}

/// Computes the next step for `instance` given `trigger`.
pub fn decide(instance: &SagaInstance, trigger: &Trigger<'_>) -> Decision {
    let from = instance.state();
    if from.is_terminal() {
        return Decision::Ignore;
    }

    let mut context = instance.context().clone();
    let context_conflicts = match trigger {
        Trigger::Event(event) => context.absorb(event),
        Trigger::DeadlineElapsed => Vec::new(),
    };
    let step = Step {
        instance,
        from,
        context,
        context_conflicts,
    };

    match (from, trigger) {
        (SagaState::Started, Trigger::Event(PaymentEvent::PaymentInitiated(_))) => {
            step.to(SagaState::AuthorizationPending)
        }
        (SagaState::AuthorizationPending, Trigger::Event(PaymentEvent::AuthorizationApproved(_))) => {
            step.process_payment()
        }
        (SagaState::AuthorizationPending, Trigger::Event(PaymentEvent::AuthorizationDeclined(data))) => {
            step.end(SagaState::Declined, format!("authorization declined: {}", data.reason))
        }
        (SagaState::ProcessingPending, Trigger::Event(PaymentEvent::ProcessingSucceeded(_))) => {
            step.settle_payment()
        }
        (SagaState::ProcessingPending, Trigger::Event(PaymentEvent::ProcessingFailed(data))) => {
            step.compensate(format!("processing failed: {}", data.reason))
        }
        (SagaState::SettlementPending, Trigger::Event(PaymentEvent::SettlementSucceeded(_))) => {
            step.to(SagaState::Completed)
        }
        (SagaState::SettlementPending, Trigger::Event(PaymentEvent::SettlementFailed(data))) => {
            step.compensate(format!("settlement failed: {}", data.reason))
        }
        (SagaState::AuthorizationVoiding, Trigger::Event(PaymentEvent::AuthorizationVoided(data))) => {
            // A confirmation for some other hold does not release ours.
            match &instance.context().authorization_id {
                Some(held) if *held != data.authorization_id => Decision::Ignore,
                _ => step.to(SagaState::Failed),
            }
        }
        // The void is already out; never send a second one.
        (SagaState::AuthorizationVoiding, Trigger::DeadlineElapsed) => {
            let mut transition = step.end_transition(
                SagaState::Failed,
                "deadline elapsed while voiding authorization".to_string(),
            );
            transition.compensation_unresolved = true;
            Decision::Apply(transition)
        }
        (_, Trigger::DeadlineElapsed) => step.compensate("deadline elapsed".to_string()),
        _ => Decision::Ignore,
    }
}

struct Step<'a> {
    instance: &'a SagaInstance,
    from: SagaState,
    context: SagaContext,
    context_conflicts: Vec<&'static str>,
}

impl Step<'_> {
    fn transition(
        self,
        to: SagaState,
        command: Option<PaymentCommand>,
        reason: Option<String>,
    ) -> Transition {
        Transition {
            from: self.from,
            to,
            context: self.context,
            command,
            reason,
            compensation_unresolved: false,
            context_conflicts: self.context_conflicts,
        }
    }

    fn to(self, to: SagaState) -> Decision {
        Decision::Apply(self.transition(to, None, None))
    }

    fn end_transition(self, to: SagaState, reason: String) -> Transition {
        self.transition(to, None, Some(reason))
    }

    fn end(self, to: SagaState, reason: String) -> Decision {
        Decision::Apply(self.end_transition(to, reason))
    }

    fn command_id(&self, step: &str) -> CommandId {
        CommandId::for_step(self.instance.id(), step)
    }

    fn process_payment(self) -> Decision {
        let ctx = &self.context;
        let fields = match (&ctx.authorization_id, ctx.amount, &ctx.currency) {
            (Some(authorization_id), Some(amount), Some(currency)) => {
                Some((authorization_id.clone(), amount, currency.clone()))
            }
            _ => None,
        };
        let Some((authorization_id, amount, currency)) = fields else {
            return self.compensate("payment details missing from saga context".to_string());
        };
        let command = PaymentCommand::ProcessPayment(ProcessPaymentData {
            command_id: self.command_id(STEP_PROCESS_PAYMENT),
            correlation_key: self.instance.correlation_key().clone(),
            authorization_id,
            amount,
            currency,
        });
        Decision::Apply(self.transition(SagaState::ProcessingPending, Some(command), None))
    }

    fn settle_payment(self) -> Decision {
        let ctx = &self.context;
        let fields = match (&ctx.processing_id, &ctx.merchant_id, ctx.amount) {
            (Some(processing_id), Some(merchant_id), Some(amount)) => {
                Some((processing_id.clone(), merchant_id.clone(), amount))
            }
            _ => None,
        };
        let Some((processing_id, merchant_id, amount)) = fields else {
            return self.compensate("settlement details missing from saga context".to_string());
        };
        let command = PaymentCommand::SettlePayment(SettlePaymentData {
            command_id: self.command_id(STEP_SETTLE_PAYMENT),
            correlation_key: self.instance.correlation_key().clone(),
            processing_id,
            merchant_id,
            amount,
        });
        Decision::Apply(self.transition(SagaState::SettlementPending, Some(command), None))
    }

    /// Voids the authorization if one exists, otherwise fails outright.
    fn compensate(self, reason: String) -> Decision {
        let Some(authorization_id) = self.context.authorization_id.clone() else {
            return self.end(SagaState::Failed, reason);
        };
        let command = PaymentCommand::VoidAuthorization(VoidAuthorizationData {
            command_id: self.command_id(STEP_VOID_AUTHORIZATION),
            correlation_key: self.instance.correlation_key().clone(),
            authorization_id,
            reason: reason.clone(),
        });
        Decision::Apply(self.transition(
            SagaState::AuthorizationVoiding,
            Some(command),
            Some(reason),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{CorrelationKey, SagaId};
    use domain::{Currency, CustomerId, DomainCommand, Money};

    fn initiated() -> PaymentEvent {
        PaymentEvent::payment_initiated(
            CustomerId::new(),
            "M-1",
            Money::from_cents(2599),
            Currency::new("EUR").unwrap(),
        )
    }

    fn new_saga() -> SagaInstance {
        SagaInstance::new(SagaId::new(), CorrelationKey::new("pay-1"), Utc::now(), 16)
    }

    /// Applies `events` in order, panicking if any is ignored.
    fn drive(events: &[PaymentEvent]) -> SagaInstance {
        let mut saga = new_saga();
        for event in events {
            let trigger = Trigger::Event(event);
            match decide(&saga, &trigger) {
                Decision::Apply(t) => saga.apply(&t, None, trigger.name(), Utc::now()),
                Decision::Ignore => panic!("{} was ignored", trigger.name()),
            }
        }
        saga
    }

    fn apply(saga: &SagaInstance, trigger: Trigger<'_>) -> Transition {
        match decide(saga, &trigger) {
            Decision::Apply(t) => t,
            Decision::Ignore => panic!("{} was ignored", trigger.name()),
        }
    }

    #[test]
    fn test_start_event_waits_for_authorization() {
        let saga = new_saga();
        let t = apply(&saga, Trigger::Event(&initiated()));
        assert_eq!(t.from, SagaState::Started);
        assert_eq!(t.to, SagaState::AuthorizationPending);
        assert!(t.command.is_none());
        assert_eq!(t.context.amount, Some(Money::from_cents(2599)));
    }

    #[test]
    fn test_approval_emits_process_payment() {
        let saga = drive(&[initiated()]);
        let t = apply(
            &saga,
            Trigger::Event(&PaymentEvent::authorization_approved("AUTH-1")),
        );

        assert_eq!(t.to, SagaState::ProcessingPending);
        let Some(PaymentCommand::ProcessPayment(data)) = t.command else {
            panic!("expected ProcessPayment");
        };
        assert_eq!(data.authorization_id.as_str(), "AUTH-1");
        assert_eq!(data.amount, Money::from_cents(2599));
        assert_eq!(data.currency.code(), "EUR");
        assert_eq!(data.correlation_key.as_str(), "pay-1");
        assert_eq!(
            data.command_id,
            CommandId::for_step(saga.id(), STEP_PROCESS_PAYMENT)
        );
    }

    #[test]
    fn test_decline_is_terminal_without_command() {
        let saga = drive(&[initiated()]);
        let t = apply(
            &saga,
            Trigger::Event(&PaymentEvent::authorization_declined("insufficient funds")),
        );
        assert_eq!(t.to, SagaState::Declined);
        assert!(t.command.is_none());
        assert_eq!(
            t.reason.as_deref(),
            Some("authorization declined: insufficient funds")
        );
    }

    #[test]
    fn test_processing_success_emits_settle_payment() {
        let saga = drive(&[initiated(), PaymentEvent::authorization_approved("AUTH-1")]);
        let t = apply(
            &saga,
            Trigger::Event(&PaymentEvent::processing_succeeded("PROC-1")),
        );

        assert_eq!(t.to, SagaState::SettlementPending);
        let Some(PaymentCommand::SettlePayment(data)) = t.command else {
            panic!("expected SettlePayment");
        };
        assert_eq!(data.processing_id.as_str(), "PROC-1");
        assert_eq!(data.merchant_id.as_str(), "M-1");
        assert_eq!(data.amount, Money::from_cents(2599));
    }

    #[test]
    fn test_processing_failure_voids_authorization() {
        let saga = drive(&[initiated(), PaymentEvent::authorization_approved("AUTH-1")]);
        let t = apply(
            &saga,
            Trigger::Event(&PaymentEvent::processing_failed("card blocked")),
        );

        assert_eq!(t.to, SagaState::AuthorizationVoiding);
        let Some(PaymentCommand::VoidAuthorization(data)) = t.command else {
            panic!("expected VoidAuthorization");
        };
        assert_eq!(data.authorization_id.as_str(), "AUTH-1");
        assert_eq!(data.reason, "processing failed: card blocked");
    }

    #[test]
    fn test_settlement_failure_voids_authorization() {
        let saga = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_succeeded("PROC-1"),
        ]);
        let t = apply(
            &saga,
            Trigger::Event(&PaymentEvent::settlement_failed("bank offline")),
        );
        assert_eq!(t.to, SagaState::AuthorizationVoiding);
        assert_eq!(
            t.command.as_ref().map(|c| c.command_type()),
            Some("VoidAuthorization")
        );
    }

    #[test]
    fn test_full_happy_path() {
        let saga = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_succeeded("PROC-1"),
            PaymentEvent::settlement_succeeded("SET-1"),
        ]);
        assert_eq!(
            saga.state_path(),
            vec![
                SagaState::Started,
                SagaState::AuthorizationPending,
                SagaState::ProcessingPending,
                SagaState::SettlementPending,
                SagaState::Completed,
            ]
        );
    }

    #[test]
    fn test_voided_ends_failed() {
        let saga = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_failed("x"),
        ]);
        let t = apply(
            &saga,
            Trigger::Event(&PaymentEvent::authorization_voided("AUTH-1")),
        );
        assert_eq!(t.to, SagaState::Failed);
        assert!(t.command.is_none());
        assert!(!t.compensation_unresolved);
    }

    #[test]
    fn test_void_for_another_authorization_is_ignored() {
        let saga = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_failed("x"),
        ]);
        assert_eq!(
            decide(
                &saga,
                &Trigger::Event(&PaymentEvent::authorization_voided("AUTH-2"))
            ),
            Decision::Ignore
        );
    }

    #[test]
    fn test_events_without_edge_are_ignored() {
        let pending = drive(&[initiated()]);
        for event in [
            initiated(),
            PaymentEvent::processing_succeeded("PROC-1"),
            PaymentEvent::settlement_succeeded("SET-1"),
            PaymentEvent::authorization_voided("AUTH-1"),
        ] {
            assert_eq!(decide(&pending, &Trigger::Event(&event)), Decision::Ignore);
        }

        // Compensation never returns to the forward path.
        let voiding = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_failed("x"),
        ]);
        assert_eq!(
            decide(
                &voiding,
                &Trigger::Event(&PaymentEvent::settlement_succeeded("SET-1"))
            ),
            Decision::Ignore
        );
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let completed = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_succeeded("PROC-1"),
            PaymentEvent::settlement_succeeded("SET-1"),
        ]);
        assert_eq!(
            decide(
                &completed,
                &Trigger::Event(&PaymentEvent::authorization_approved("AUTH-1"))
            ),
            Decision::Ignore
        );
        assert_eq!(decide(&completed, &Trigger::DeadlineElapsed), Decision::Ignore);

        let declined = drive(&[initiated(), PaymentEvent::authorization_declined("no")]);
        assert_eq!(decide(&declined, &Trigger::DeadlineElapsed), Decision::Ignore);
    }

    #[test]
    fn test_deadline_before_authorization_fails_directly() {
        let saga = drive(&[initiated()]);
        let t = apply(&saga, Trigger::DeadlineElapsed);
        assert_eq!(t.to, SagaState::Failed);
        assert!(t.command.is_none());
        assert_eq!(t.reason.as_deref(), Some("deadline elapsed"));
    }

    #[test]
    fn test_deadline_after_authorization_voids() {
        for events in [
            vec![initiated(), PaymentEvent::authorization_approved("AUTH-1")],
            vec![
                initiated(),
                PaymentEvent::authorization_approved("AUTH-1"),
                PaymentEvent::processing_succeeded("PROC-1"),
            ],
        ] {
            let saga = drive(&events);
            let t = apply(&saga, Trigger::DeadlineElapsed);
            assert_eq!(t.to, SagaState::AuthorizationVoiding);
            assert!(t.command.as_ref().is_some_and(|c| c.is_compensation()));
        }
    }

    #[test]
    fn test_deadline_while_voiding_does_not_void_twice() {
        let saga = drive(&[
            initiated(),
            PaymentEvent::authorization_approved("AUTH-1"),
            PaymentEvent::processing_failed("x"),
        ]);
        let t = apply(&saga, Trigger::DeadlineElapsed);
        assert_eq!(t.to, SagaState::Failed);
        assert!(t.command.is_none());
        assert!(t.compensation_unresolved);
    }
}
