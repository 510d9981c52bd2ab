//! Outbound command delivery.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CommandId, DomainCommand, PaymentCommand};

use crate::error::{Result, SagaError};

/// Acknowledgement that a command was handed to its service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub command_id: CommandId,
    pub accepted_at: DateTime<Utc>,
}

/// Sends commands to the payment services.
///
/// Delivery is at-least-once: the same command (same `CommandId`) may be
/// dispatched more than once and receivers are expected to deduplicate.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Dispatches a command, returning once the transport has accepted it.
    async fn dispatch(&self, command: &PaymentCommand) -> Result<CommandAck>;
}

#[derive(Debug, Default)]
struct InMemoryDispatcherState {
    sent: Vec<PaymentCommand>,
    fail_on: HashSet<&'static str>,
}

/// In-memory dispatcher for testing.
///
/// Records every accepted command and can be told to reject commands of a
/// given type.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommandDispatcher {
    state: Arc<RwLock<InMemoryDispatcherState>>,
}

impl InMemoryCommandDispatcher {
    /// Creates a new in-memory dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the dispatcher to reject commands of `command_type`.
    pub fn set_fail_on(&self, command_type: &'static str, fail: bool) {
        let mut state = self.state.write().unwrap();
        if fail {
            state.fail_on.insert(command_type);
        } else {
            state.fail_on.remove(command_type);
        }
    }

    /// Returns every accepted command, oldest first.
    pub fn sent(&self) -> Vec<PaymentCommand> {
        self.state.read().unwrap().sent.clone()
    }

    /// Returns how many commands of `command_type` were accepted.
    pub fn count_of(&self, command_type: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|c| c.command_type() == command_type)
            .count()
    }

    /// Returns the number of accepted commands.
    pub fn len(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns true if nothing was accepted.
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().sent.is_empty()
    }
}

#[async_trait]
impl CommandDispatcher for InMemoryCommandDispatcher {
    async fn dispatch(&self, command: &PaymentCommand) -> Result<CommandAck> {
        let mut state = self.state.write().unwrap();
        let command_type = command.command_type();
        if state.fail_on.contains(command_type) {
            return Err(SagaError::Dispatch {
                command: command_type,
                reason: "service unavailable".to_string(),
            });
        }
        state.sent.push(command.clone());
        Ok(CommandAck {
            command_id: command.command_id(),
            accepted_at: Utc::now(),
        })
    }
}
