//! Saga instance: the persisted unit of work.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use common::{CorrelationKey, EventId, SagaId, Version};
use domain::PaymentCommand;
use serde::{Deserialize, Serialize};

use crate::context::SagaContext;
use crate::machine::{Transition, VOID_DISPATCH_FAILED};
use crate::scheduler::DeadlineToken;
use crate::state::SagaState;

/// Bounded memory of recently applied event IDs.
///
/// Sagas are short-lived, so remembering the last few dozen IDs is enough to
/// absorb transport redeliveries. The oldest ID is evicted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvents {
    capacity: usize,
    ids: VecDeque<EventId>,
}

impl ProcessedEvents {
    /// Creates an empty set remembering at most `capacity` IDs.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ids: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns true if `event_id` was recorded and not yet evicted.
    pub fn contains(&self, event_id: &EventId) -> bool {
        self.ids.contains(event_id)
    }

    /// Records `event_id`, evicting the oldest entry when full.
    pub fn insert(&mut self, event_id: EventId) {
        if self.contains(&event_id) {
            return;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(event_id);
    }

    /// Returns the number of remembered IDs.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no ID is remembered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The deadline currently armed for a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedDeadline {
    /// Handle returned by the scheduler.
    pub token: DeadlineToken,
    /// When the deadline fires.
    pub due_at: DateTime<Utc>,
}

/// One applied transition, kept as an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: SagaState,
    pub to: SagaState,
    /// Event type name, or `DeadlineElapsed`.
    pub trigger: String,
    /// Type of the command emitted by this transition, if any.
    pub command: Option<String>,
    pub at: DateTime<Utc>,
}

/// A single payment saga.
///
/// Only the orchestrator mutates an instance, and only by applying a
/// `Transition` computed by the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    id: SagaId,
    correlation_key: CorrelationKey,
    version: Version,
    state: SagaState,
    context: SagaContext,
    started_at: DateTime<Utc>,
    processed_events: ProcessedEvents,
    deadline: Option<ArmedDeadline>,
    /// Command persisted by the last transition and not yet dispatched.
    #[serde(default)]
    pending_command: Option<PaymentCommand>,
    /// Why the saga ended without completing, if it did.
    reason: Option<String>,
    /// Set when the compensating void could not be confirmed.
    compensation_unresolved: bool,
    history: Vec<TransitionRecord>,
}

impl SagaInstance {
    /// Creates a fresh, never-saved saga in the `Started` state.
    pub fn new(
        id: SagaId,
        correlation_key: CorrelationKey,
        started_at: DateTime<Utc>,
        processed_event_capacity: usize,
    ) -> Self {
        Self {
            id,
            correlation_key,
            version: Version::initial(),
            state: SagaState::Started,
            context: SagaContext::default(),
            started_at,
            processed_events: ProcessedEvents::with_capacity(processed_event_capacity),
            deadline: None,
            pending_command: None,
            reason: None,
            compensation_unresolved: false,
            history: Vec::new(),
        }
    }

    /// Applies a transition computed by the state machine.
    pub(crate) fn apply(
        &mut self,
        transition: &Transition,
        event_id: Option<EventId>,
        trigger: &str,
        at: DateTime<Utc>,
    ) {
        self.history.push(TransitionRecord {
            from: self.state,
            to: transition.to,
            trigger: trigger.to_string(),
            command: transition
                .command
                .as_ref()
                .map(|c| domain::DomainCommand::command_type(c).to_string()),
            at,
        });
        self.state = transition.to;
        self.context = transition.context.clone();
        self.pending_command = transition.command.clone();
        if let Some(reason) = &transition.reason {
            self.reason = Some(reason.clone());
        }
        if transition.compensation_unresolved {
            self.compensation_unresolved = true;
        }
        if let Some(event_id) = event_id {
            self.processed_events.insert(event_id);
        }
    }

    pub(crate) fn clear_pending_command(&mut self) {
        self.pending_command = None;
    }

    /// Ends a compensating saga whose void could not be dispatched.
    ///
    /// There is no compensation for a failed compensation: the saga ends
    /// `Failed` and is flagged for manual follow-up.
    pub(crate) fn fail_compensation(&mut self, error: impl std::fmt::Display, at: DateTime<Utc>) {
        self.history.push(TransitionRecord {
            from: self.state,
            to: SagaState::Failed,
            trigger: VOID_DISPATCH_FAILED.to_string(),
            command: None,
            at,
        });
        self.state = SagaState::Failed;
        self.pending_command = None;
        self.deadline = None;
        self.compensation_unresolved = true;
        let cause = self.reason.take().unwrap_or_default();
        self.reason = Some(format!("{cause}; void authorization failed: {error}"));
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<ArmedDeadline>) {
        self.deadline = deadline;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl SagaInstance {
    /// Returns the saga ID.
    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Returns the correlation key routing events to this saga.
    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.correlation_key
    }

    /// Returns the version this instance was loaded or saved at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the saga state.
    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the accumulated transaction context.
    pub fn context(&self) -> &SagaContext {
        &self.context
    }

    /// Returns when the saga was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns true if `event_id` has already been applied.
    pub fn has_processed(&self, event_id: &EventId) -> bool {
        self.processed_events.contains(event_id)
    }

    /// Returns the remembered event IDs.
    pub fn processed_events(&self) -> &ProcessedEvents {
        &self.processed_events
    }

    /// Returns the armed deadline, if any.
    pub fn deadline(&self) -> Option<ArmedDeadline> {
        self.deadline
    }

    /// Returns the token of the armed deadline, if any.
    pub fn deadline_token(&self) -> Option<DeadlineToken> {
        self.deadline.map(|d| d.token)
    }

    /// Returns the command awaiting dispatch, if any.
    pub fn pending_command(&self) -> Option<&PaymentCommand> {
        self.pending_command.as_ref()
    }

    /// Returns why the saga ended without completing, if it did.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns true if a void could not be confirmed and needs manual follow-up.
    pub fn compensation_unresolved(&self) -> bool {
        self.compensation_unresolved
    }

    /// Returns every applied transition, oldest first.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Returns the sequence of states visited, starting with `Started`.
    pub fn state_path(&self) -> Vec<SagaState> {
        let mut path = vec![SagaState::Started];
        path.extend(self.history.iter().map(|r| r.to));
        path
    }
}
