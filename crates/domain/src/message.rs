//! Core message traits.

use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in another service.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Used for logging, metrics labels and wire-format tagging.
    fn event_type(&self) -> &'static str;
}

/// Trait for commands sent to another service.
///
/// Commands are fire-and-forget requests named in the imperative. The
/// receiving service answers, eventually, with a domain event.
pub trait DomainCommand: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the command type name.
    fn command_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Happened { value: i32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Happened { .. } => "TestHappened",
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestCommand {
        DoIt,
    }

    impl DomainCommand for TestCommand {
        fn command_type(&self) -> &'static str {
            "DoIt"
        }
    }

    #[test]
    fn test_message_type_names() {
        assert_eq!(TestEvent::Happened { value: 1 }.event_type(), "TestHappened");
        assert_eq!(TestCommand::DoIt.command_type(), "DoIt");
    }
}
