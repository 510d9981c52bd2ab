//! The saga orchestrator.
//!
//! Routes each input to its saga instance by correlation key, evaluates the
//! transition table, dispatches the resulting command and persists the new
//! state. Inputs for the same key are applied one at a time; inputs for
//! different keys proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationKey, EventId, SagaId};
use domain::{DomainCommand, InboundEvent, PaymentCommand};
use tokio::sync::OwnedMutexGuard;

use crate::config::SagaConfig;
use crate::correlation::CorrelationIndex;
use crate::dispatcher::CommandDispatcher;
use crate::error::Result;
use crate::instance::{ArmedDeadline, SagaInstance};
use crate::machine::{self, DEADLINE_ELAPSED, Decision, Transition, Trigger};
use crate::payment_saga::SAGA_TYPE;
use crate::repository::SagaRepository;
use crate::scheduler::{DeadlineElapsed, DeadlineScheduler};
use crate::state::SagaState;

/// An input the orchestrator can apply.
#[derive(Debug, Clone)]
pub enum SagaInput {
    /// A domain event delivered by the transport.
    Event(InboundEvent),
    /// A saga deadline expired.
    Deadline(DeadlineElapsed),
}

impl SagaInput {
    /// Returns the key used to route this input.
    pub fn correlation_key(&self) -> &CorrelationKey {
        match self {
            SagaInput::Event(event) => &event.correlation_key,
            SagaInput::Deadline(elapsed) => &elapsed.correlation_key,
        }
    }

    /// Returns the event type name, or `DeadlineElapsed`.
    pub fn name(&self) -> &'static str {
        match self {
            SagaInput::Event(event) => event.event_type(),
            SagaInput::Deadline(_) => DEADLINE_ELAPSED,
        }
    }
}

impl From<InboundEvent> for SagaInput {
    fn from(event: InboundEvent) -> Self {
        SagaInput::Event(event)
    }
}

impl From<DeadlineElapsed> for SagaInput {
    fn from(elapsed: DeadlineElapsed) -> Self {
        SagaInput::Deadline(elapsed)
    }
}

/// Why an input was dropped without touching any saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// A non-start event for a key no saga was ever started for.
    UnknownCorrelation,
    /// The saga already reached a terminal state.
    Terminal { saga_id: SagaId, state: SagaState },
    /// The key is bound but no saga instance is stored under it.
    UnknownSaga,
    /// A deadline that no longer matches the saga's armed deadline.
    StaleDeadline,
}

impl DiscardReason {
    /// Returns the metric label for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::UnknownCorrelation => "unknown_correlation",
            DiscardReason::Terminal { .. } => "terminal",
            DiscardReason::UnknownSaga => "unknown_saga",
            DiscardReason::StaleDeadline => "stale_deadline",
        }
    }
}

/// What happened to an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The saga moved from `from` to `to`, emitting `command` if any.
    Applied {
        saga_id: SagaId,
        from: SagaState,
        to: SagaState,
        command: Option<PaymentCommand>,
    },
    /// The event was already applied; nothing changed.
    Duplicate { saga_id: SagaId, state: SagaState },
    /// The event has no edge from the saga's current state.
    Ignored { saga_id: SagaId, state: SagaState },
    /// The input was dropped before reaching a saga.
    Discarded(DiscardReason),
}

impl HandleOutcome {
    /// Returns the saga the input was routed to, if any.
    pub fn saga_id(&self) -> Option<SagaId> {
        match self {
            HandleOutcome::Applied { saga_id, .. }
            | HandleOutcome::Duplicate { saga_id, .. }
            | HandleOutcome::Ignored { saga_id, .. }
            | HandleOutcome::Discarded(DiscardReason::Terminal { saga_id, .. }) => Some(*saga_id),
            HandleOutcome::Discarded(_) => None,
        }
    }

    /// Returns the emitted command, if any.
    pub fn command(&self) -> Option<&PaymentCommand> {
        match self {
            HandleOutcome::Applied { command, .. } => command.as_ref(),
            _ => None,
        }
    }
}

/// Anything that can apply saga inputs.
#[async_trait]
pub trait SagaHandler: Send + Sync {
    /// Applies one input.
    ///
    /// An `Err` means the input was not applied and its delivery should be
    /// retried if the error is retryable.
    async fn handle(&self, input: SagaInput) -> Result<HandleOutcome>;
}

/// Per-key async locks, removed once no task holds or waits on them.
///
/// The outer std mutex guards only map lookups and is never held across an
/// `.await`.
#[derive(Default)]
struct KeyLocks {
    locks: Arc<Mutex<HashMap<CorrelationKey, Arc<tokio::sync::Mutex<()>>>>>,
}

struct KeyGuard {
    key: CorrelationKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<CorrelationKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &CorrelationKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

fn due_at(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Orchestrates payment sagas.
///
/// Collaborators are injected so tests run against in-memory doubles and the
/// service binary against real transports.
pub struct SagaOrchestrator<C, R, D, S>
where
    C: CorrelationIndex,
    R: SagaRepository,
    D: CommandDispatcher,
    S: DeadlineScheduler,
{
    index: C,
    repository: R,
    dispatcher: D,
    scheduler: S,
    config: SagaConfig,
    locks: KeyLocks,
}

impl<C, R, D, S> SagaOrchestrator<C, R, D, S>
where
    C: CorrelationIndex,
    R: SagaRepository,
    D: CommandDispatcher,
    S: DeadlineScheduler,
{
    /// Creates a new orchestrator.
    pub fn new(index: C, repository: R, dispatcher: D, scheduler: S, config: SagaConfig) -> Self {
        Self {
            index,
            repository,
            dispatcher,
            scheduler,
            config,
            locks: KeyLocks::default(),
        }
    }

    /// Returns the orchestrator's configuration.
    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Applies a domain event.
    #[tracing::instrument(
        skip(self, event),
        fields(
            saga_type = SAGA_TYPE,
            correlation_key = %event.correlation_key,
            event_type = event.event_type(),
            event_id = %event.event_id,
        )
    )]
    pub async fn handle_event(&self, event: InboundEvent) -> Result<HandleOutcome> {
        let key = event.correlation_key.clone();
        let _guard = self.locks.acquire(&key).await;
        let is_start = event.event.is_start();

        let saga_id = if is_start {
            let (saga_id, created) = self.index.create_if_absent(&key, SagaId::new()).await?;
            if created {
                tracing::debug!(%saga_id, "correlation key bound");
            }
            saga_id
        } else {
            match self.index.resolve(&key).await? {
                Some(saga_id) => saga_id,
                None => return Ok(self.discard(DiscardReason::UnknownCorrelation)),
            }
        };

        let mut instance = match self.repository.load(saga_id).await? {
            Some(instance) => instance,
            None if is_start => SagaInstance::new(
                saga_id,
                key,
                Utc::now(),
                self.config.processed_event_capacity,
            ),
            None => return Ok(self.discard(DiscardReason::UnknownSaga)),
        };
        self.flush_pending(&mut instance).await?;

        if instance.has_processed(&event.event_id) {
            metrics::counter!("saga_duplicates_total").increment(1);
            tracing::debug!(%saga_id, state = %instance.state(), "duplicate event");
            return Ok(HandleOutcome::Duplicate {
                saga_id,
                state: instance.state(),
            });
        }

        if instance.state().is_terminal() {
            return Ok(self.discard(DiscardReason::Terminal {
                saga_id,
                state: instance.state(),
            }));
        }

        let trigger = Trigger::Event(&event.event);
        match machine::decide(&instance, &trigger) {
            Decision::Apply(transition) => {
                self.commit(instance, transition, Some(event.event_id), trigger)
                    .await
            }
            Decision::Ignore => Ok(self.ignore(&instance)),
        }
    }

    /// Applies an expired deadline.
    #[tracing::instrument(
        skip(self, elapsed),
        fields(
            saga_type = SAGA_TYPE,
            saga_id = %elapsed.saga_id,
            correlation_key = %elapsed.correlation_key,
        )
    )]
    pub async fn handle_deadline(&self, elapsed: DeadlineElapsed) -> Result<HandleOutcome> {
        let _guard = self.locks.acquire(&elapsed.correlation_key).await;

        let Some(mut instance) = self.repository.load(elapsed.saga_id).await? else {
            return Ok(self.discard(DiscardReason::UnknownSaga));
        };
        self.flush_pending(&mut instance).await?;
        if instance.state().is_terminal() {
            return Ok(self.discard(DiscardReason::Terminal {
                saga_id: instance.id(),
                state: instance.state(),
            }));
        }
        if instance.deadline_token() != Some(elapsed.token) {
            return Ok(self.discard(DiscardReason::StaleDeadline));
        }

        metrics::counter!("saga_deadlines_fired_total").increment(1);
        tracing::warn!(state = %instance.state(), "saga deadline elapsed");

        let trigger = Trigger::DeadlineElapsed;
        match machine::decide(&instance, &trigger) {
            Decision::Apply(transition) => self.commit(instance, transition, None, trigger).await,
            Decision::Ignore => Ok(self.ignore(&instance)),
        }
    }

    /// Loads a saga by ID.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        self.repository.load(saga_id).await
    }

    /// Loads the saga bound to a correlation key.
    pub async fn find_by_correlation(&self, key: &CorrelationKey) -> Result<Option<SagaInstance>> {
        match self.index.resolve(key).await? {
            Some(saga_id) => self.repository.load(saga_id).await,
            None => Ok(None),
        }
    }

    /// Re-arms the deadline of every active saga, e.g. after a restart.
    ///
    /// Each saga keeps its original due time; an overdue saga fires
    /// immediately. Commands left pending are dispatched first. Returns the
    /// number of deadlines armed.
    #[tracing::instrument(skip(self), fields(saga_type = SAGA_TYPE))]
    pub async fn recover_deadlines(&self) -> Result<usize> {
        let mut recovered = 0;
        for active in self.repository.list_active().await? {
            let _guard = self.locks.acquire(active.correlation_key()).await;
            // Reload under the key lock; the listed copy may be stale.
            let Some(mut instance) = self.repository.load(active.id()).await? else {
                continue;
            };
            self.flush_pending(&mut instance).await?;
            if instance.state().is_terminal() {
                continue;
            }

            let now = Utc::now();
            let due = instance
                .deadline()
                .map(|d| d.due_at)
                .unwrap_or_else(|| due_at(instance.started_at(), self.config.deadline));
            let after = (due - now).to_std().unwrap_or(Duration::ZERO);

            let saga_id = instance.id();
            self.scheduler.disarm(saga_id).await;
            let token = self
                .scheduler
                .arm(saga_id, instance.correlation_key(), after)
                .await?;
            instance.set_deadline(Some(ArmedDeadline { token, due_at: due }));
            if let Err(err) = self.repository.save(&instance).await {
                self.scheduler.disarm(saga_id).await;
                return Err(err);
            }
            tracing::info!(%saga_id, state = %instance.state(), due_at = %due, "deadline recovered");
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Applies and persists a transition, then dispatches its command.
    ///
    /// The command is saved as pending together with the new state, so a
    /// failed save sends nothing and a failed dispatch is retried from the
    /// stored marker; re-sent commands carry the same `CommandId`.
    async fn commit(
        &self,
        mut instance: SagaInstance,
        transition: Transition,
        event_id: Option<EventId>,
        trigger: Trigger<'_>,
    ) -> Result<HandleOutcome> {
        let saga_id = instance.id();
        let from = transition.from;

        if !transition.context_conflicts.is_empty() {
            tracing::warn!(
                %saga_id,
                fields = ?transition.context_conflicts,
                "event disagrees with recorded context, keeping first values"
            );
        }

        let now = Utc::now();
        instance.apply(&transition, event_id, trigger.name(), now);

        if matches!(trigger, Trigger::DeadlineElapsed) {
            instance.set_deadline(None);
        }
        let mut armed = false;
        if transition.to.is_terminal() {
            instance.set_deadline(None);
        } else if instance.deadline().is_none() {
            let after = if transition.to.is_compensating() {
                self.config.compensation_deadline
            } else {
                self.config.deadline
            };
            let token = self
                .scheduler
                .arm(saga_id, instance.correlation_key(), after)
                .await?;
            instance.set_deadline(Some(ArmedDeadline {
                token,
                due_at: due_at(now, after),
            }));
            armed = true;
        }

        match self.repository.save(&instance).await {
            Ok(version) => instance.set_version(version),
            Err(err) => {
                if armed {
                    self.scheduler.disarm(saga_id).await;
                }
                return Err(err);
            }
        }

        if transition.to.is_terminal() {
            self.scheduler.disarm(saga_id).await;
        }

        self.record(&instance, &transition, trigger.name(), now);
        let command = self.flush_pending(&mut instance).await?;

        Ok(HandleOutcome::Applied {
            saga_id,
            from,
            to: instance.state(),
            command,
        })
    }

    /// Dispatches the instance's pending command and persists the result.
    ///
    /// Returns the command if it was delivered. A rejected void ends the saga
    /// `Failed` with the compensation unresolved; any other rejection is
    /// returned and the command stays pending for the next input.
    async fn flush_pending(&self, instance: &mut SagaInstance) -> Result<Option<PaymentCommand>> {
        let Some(command) = instance.pending_command().cloned() else {
            return Ok(None);
        };
        let saga_id = instance.id();
        let command_type = command.command_type();

        let delivered = match self.dispatcher.dispatch(&command).await {
            Ok(ack) => {
                metrics::counter!("saga_commands_dispatched_total", "command" => command_type)
                    .increment(1);
                tracing::debug!(%saga_id, command = command_type, command_id = %ack.command_id, "command dispatched");
                instance.clear_pending_command();
                true
            }
            Err(err) if command.is_compensation() => {
                metrics::counter!("saga_compensation_failures_total").increment(1);
                tracing::error!(
                    %saga_id,
                    correlation_key = %instance.correlation_key(),
                    error = %err,
                    "void authorization could not be dispatched, compensation unresolved"
                );
                instance.fail_compensation(&err, Utc::now());
                false
            }
            Err(err) => return Err(err),
        };

        let version = self.repository.save(instance).await?;
        instance.set_version(version);
        if !delivered {
            self.scheduler.disarm(saga_id).await;
            self.record_end(instance, Utc::now());
        }
        Ok(delivered.then_some(command))
    }

    fn record(
        &self,
        instance: &SagaInstance,
        transition: &Transition,
        trigger: &str,
        now: DateTime<Utc>,
    ) {
        let saga_id = instance.id();
        let command = transition.command.as_ref().map(|c| c.command_type());
        tracing::info!(
            %saga_id,
            correlation_key = %instance.correlation_key(),
            from = %transition.from,
            to = %transition.to,
            trigger,
            command,
            version = %instance.version(),
            "saga transition"
        );

        if transition.from == SagaState::Started {
            metrics::counter!("saga_started_total").increment(1);
        }
        if transition.to.is_compensating() {
            metrics::counter!("saga_compensations_total").increment(1);
        }
        if transition.to.is_terminal() {
            self.record_end(instance, now);
        }
    }

    fn record_end(&self, instance: &SagaInstance, now: DateTime<Utc>) {
        let state = instance.state();
        match state {
            SagaState::Completed => metrics::counter!("saga_completed_total").increment(1),
            SagaState::Declined => metrics::counter!("saga_declined_total").increment(1),
            _ => metrics::counter!("saga_failed_total").increment(1),
        }
        let duration = (now - instance.started_at())
            .to_std()
            .unwrap_or(Duration::ZERO);
        metrics::histogram!("saga_duration_seconds", "outcome" => state.as_str())
            .record(duration.as_secs_f64());
        tracing::info!(
            saga_id = %instance.id(),
            %state,
            reason = instance.reason(),
            compensation_unresolved = instance.compensation_unresolved(),
            duration_ms = duration.as_millis() as u64,
            "saga finished"
        );
    }

    fn discard(&self, reason: DiscardReason) -> HandleOutcome {
        metrics::counter!("saga_inputs_discarded_total", "reason" => reason.as_str()).increment(1);
        tracing::warn!(reason = reason.as_str(), "input discarded");
        HandleOutcome::Discarded(reason)
    }

    fn ignore(&self, instance: &SagaInstance) -> HandleOutcome {
        metrics::counter!("saga_inputs_discarded_total", "reason" => "no_transition").increment(1);
        tracing::warn!(
            saga_id = %instance.id(),
            state = %instance.state(),
            "no transition from current state, event ignored"
        );
        HandleOutcome::Ignored {
            saga_id: instance.id(),
            state: instance.state(),
        }
    }
}

#[async_trait]
impl<C, R, D, S> SagaHandler for SagaOrchestrator<C, R, D, S>
where
    C: CorrelationIndex,
    R: SagaRepository,
    D: CommandDispatcher,
    S: DeadlineScheduler,
{
    async fn handle(&self, input: SagaInput) -> Result<HandleOutcome> {
        match input {
            SagaInput::Event(event) => self.handle_event(event).await,
            SagaInput::Deadline(elapsed) => self.handle_deadline(elapsed).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::InMemoryCorrelationIndex;
    use crate::dispatcher::InMemoryCommandDispatcher;
    use crate::repository::InMemorySagaRepository;
    use crate::scheduler::ManualDeadlineScheduler;
    use domain::{Currency, CustomerId, Money, PaymentEvent};

    type TestOrchestrator = SagaOrchestrator<
        InMemoryCorrelationIndex,
        InMemorySagaRepository,
        InMemoryCommandDispatcher,
        ManualDeadlineScheduler,
    >;

    struct Fixture {
        orchestrator: TestOrchestrator,
        repository: InMemorySagaRepository,
        dispatcher: InMemoryCommandDispatcher,
        scheduler: ManualDeadlineScheduler,
    }

    fn fixture() -> Fixture {
        let repository = InMemorySagaRepository::new();
        let dispatcher = InMemoryCommandDispatcher::new();
        let scheduler = ManualDeadlineScheduler::new();
        let orchestrator = SagaOrchestrator::new(
            InMemoryCorrelationIndex::new(),
            repository.clone(),
            dispatcher.clone(),
            scheduler.clone(),
            SagaConfig::default(),
        );
        Fixture {
            orchestrator,
            repository,
            dispatcher,
            scheduler,
        }
    }

    fn initiated(key: &str) -> InboundEvent {
        InboundEvent::new(
            key,
            PaymentEvent::payment_initiated(
                CustomerId::new(),
                "M-1",
                Money::from_cents(1000),
                Currency::new("USD").unwrap(),
            ),
        )
    }

    #[tokio::test]
    async fn test_start_creates_saga_and_arms_deadline() {
        let f = fixture();
        let outcome = f.orchestrator.handle_event(initiated("pay-1")).await.unwrap();

        let HandleOutcome::Applied {
            saga_id,
            from,
            to,
            command,
        } = outcome
        else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(from, SagaState::Started);
        assert_eq!(to, SagaState::AuthorizationPending);
        assert!(command.is_none());

        let saga = f.orchestrator.get_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.deadline_token(), f.scheduler.armed(saga_id));
        assert_eq!(
            f.scheduler.armed_after(saga_id),
            Some(SagaConfig::default().deadline)
        );
    }

    #[tokio::test]
    async fn test_unknown_correlation_is_discarded() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .handle_event(InboundEvent::new(
                "nobody",
                PaymentEvent::authorization_approved("AUTH-1"),
            ))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            HandleOutcome::Discarded(DiscardReason::UnknownCorrelation)
        );
        assert!(f.repository.is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_command_pending() {
        let f = fixture();
        f.orchestrator.handle_event(initiated("pay-1")).await.unwrap();
        f.dispatcher.set_fail_on("ProcessPayment", true);

        let approved = InboundEvent::new("pay-1", PaymentEvent::authorization_approved("AUTH-1"));
        let err = f
            .orchestrator
            .handle_event(approved.clone())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let saga = f
            .orchestrator
            .find_by_correlation(&CorrelationKey::new("pay-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saga.state(), SagaState::ProcessingPending);
        assert!(matches!(
            saga.pending_command(),
            Some(PaymentCommand::ProcessPayment(_))
        ));
        assert!(f.dispatcher.is_empty());

        // The redelivered event is a duplicate, but it flushes the command.
        f.dispatcher.set_fail_on("ProcessPayment", false);
        let outcome = f.orchestrator.handle_event(approved).await.unwrap();
        assert!(matches!(
            outcome,
            HandleOutcome::Duplicate {
                state: SagaState::ProcessingPending,
                ..
            }
        ));
        assert_eq!(f.dispatcher.count_of("ProcessPayment"), 1);
        let saga = f.orchestrator.get_saga(saga.id()).await.unwrap().unwrap();
        assert!(saga.pending_command().is_none());
    }

    #[tokio::test]
    async fn test_failed_save_sends_no_command() {
        let f = fixture();
        f.orchestrator.handle_event(initiated("pay-1")).await.unwrap();
        let approved = InboundEvent::new("pay-1", PaymentEvent::authorization_approved("AUTH-1"));
        let saga_id = f
            .orchestrator
            .handle_event(approved)
            .await
            .unwrap()
            .saga_id()
            .unwrap();

        let elapsed = f.scheduler.fire(saga_id).unwrap();
        f.repository.set_fail_on_save(true).await;
        for _ in 0..3 {
            let err = f
                .orchestrator
                .handle_deadline(elapsed.clone())
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(f.dispatcher.is_empty());
        assert_eq!(f.scheduler.armed_count(), 0);

        f.repository.set_fail_on_save(false).await;
        let outcome = f.orchestrator.handle_deadline(elapsed).await.unwrap();
        assert!(matches!(
            outcome,
            HandleOutcome::Applied {
                to: SagaState::AuthorizationVoiding,
                command: Some(PaymentCommand::VoidAuthorization(_)),
                ..
            }
        ));
        assert_eq!(f.dispatcher.count_of("VoidAuthorization"), 1);
        assert_eq!(f.scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_disarms_new_deadline() {
        let f = fixture();
        f.repository.set_fail_on_save(true).await;

        let err = f
            .orchestrator
            .handle_event(initiated("pay-1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.scheduler.arm_calls(), 1);
        assert_eq!(f.scheduler.armed_count(), 0);

        // The redelivered start event re-creates the saga under the bound ID.
        f.repository.set_fail_on_save(false).await;
        let outcome = f.orchestrator.handle_event(initiated("pay-1")).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Applied { .. }));
        assert_eq!(f.scheduler.armed_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_deadline_is_discarded() {
        let f = fixture();
        let outcome = f.orchestrator.handle_event(initiated("pay-1")).await.unwrap();
        let saga_id = outcome.saga_id().unwrap();

        let mut elapsed = f.scheduler.fire(saga_id).unwrap();
        elapsed.token = crate::scheduler::DeadlineToken::new();

        let outcome = f.orchestrator.handle_deadline(elapsed).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Discarded(DiscardReason::StaleDeadline));
        let saga = f.orchestrator.get_saga(saga_id).await.unwrap().unwrap();
        assert_eq!(saga.state(), SagaState::AuthorizationPending);
    }

    #[tokio::test]
    async fn test_key_locks_are_released() {
        let locks = KeyLocks::default();
        let key = CorrelationKey::new("pay-1");
        {
            let _guard = locks.acquire(&key).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_key_lock_serializes_same_key() {
        let locks = Arc::new(KeyLocks::default());
        let key = CorrelationKey::new("pay-1");
        let guard = locks.acquire(&key).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&key).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // A different key is not blocked.
        let _other = locks.acquire(&CorrelationKey::new("pay-2")).await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[test]
    fn test_due_at_saturates() {
        let now = Utc::now();
        assert_eq!(due_at(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            due_at(now, Duration::from_secs(60)),
            now + chrono::Duration::seconds(60)
        );
    }
}
