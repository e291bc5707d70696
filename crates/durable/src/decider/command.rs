//! Workflow commands: the decider's intents for one cycle.
//!
//! One generic `WorkflowCommand<O>` enum covers every decider: this engine's
//! only notion of "work" is an output message headed to a message bus or
//! scheduler collaborator, so there is no separate activity/timer/child-workflow
//! command family to model.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An intent returned by `Decide`, to be translated into an audit event and,
/// except for `Complete`, an output command message in the same append call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowCommand<O> {
    /// Deliver `out` to the message-bus collaborator, at-least-once.
    Send(O),

    /// Publish `out` to the message-bus collaborator, at-least-once.
    Publish(O),

    /// Hand `out` to the scheduler collaborator for redelivery as a new
    /// external input after `delay`.
    Schedule {
        #[serde(with = "duration_millis")]
        delay: Duration,
        output: O,
    },

    /// Reply to a query input without mutating state.
    Reply(O),

    /// Mark the instance terminated. Carries no payload; translates to a
    /// `Completed` audit event and no output command message.
    Complete,
}

impl<O> WorkflowCommand<O> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_carries_no_payload_and_is_detected() {
        let complete: WorkflowCommand<&str> = WorkflowCommand::Complete;
        assert!(complete.is_complete());

        let send: WorkflowCommand<&str> = WorkflowCommand::Send("ProcessPayment");
        assert!(!send.is_complete());
    }

    #[test]
    fn schedule_serializes_delay_as_millis() {
        let command: WorkflowCommand<&str> = WorkflowCommand::Schedule {
            delay: Duration::from_secs(60 * 15),
            output: "PaymentTimeout",
        };
        let json = serde_json::to_string(&command).unwrap();
        assert!(json.contains("\"type\":\"schedule\""));

        let parsed: WorkflowCommand<String> = serde_json::from_str(&json).unwrap();
        match parsed {
            WorkflowCommand::Schedule { delay, .. } => assert_eq!(delay, Duration::from_secs(900)),
            _ => panic!("expected Schedule"),
        }
    }
}
