//! Audit events: the state-mutation log a workflow's stream records.
//!
//! One generic `WorkflowEvent<I, O>` enum serves every workflow type, since a
//! single decider engine is reused across many workflow definitions rather
//! than hardcoding one product's fixed event set.

use serde::{Deserialize, Serialize};

/// Audit events appended to a stream. Exactly one of these accompanies every
/// input processed and every output command emitted (see invariant 6 on
/// `WorkflowMessage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent<I, O> {
    /// Recorded once, as the first event of a stream, alongside `InitiatedBy`.
    Began,

    /// The input that began the instance. Appears exactly once, at position 2.
    InitiatedBy(I),

    /// A later input was received and handed to `Decide`.
    Received(I),

    /// A `Send` command was emitted.
    Sent(O),

    /// A `Publish` command was emitted.
    Published(O),

    /// A `Schedule` command was emitted; `after` is the requested delay,
    /// serialized as milliseconds.
    Scheduled {
        #[serde(with = "duration_millis")]
        after: std::time::Duration,
        output: O,
    },

    /// A `Reply` command was emitted (in answer to a query input).
    Replied(O),

    /// The instance reached its terminal state.
    Completed,
}

impl<I, O> WorkflowEvent<I, O> {
    /// Whether this event ends the instance's active lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether this event is the unique begin-marker for a stream.
    pub fn is_began(&self) -> bool {
        matches!(self, Self::Began)
    }
}

/// Serde support for `Duration` as milliseconds.
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
