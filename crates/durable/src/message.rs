//! The unified workflow message and its stream-position bookkeeping.
//!
//! A [`WorkflowMessage`] is the only record type persistence ever sees. One
//! per-instance stream of these records serves simultaneously as inbox,
//! outbox, audit log, and outbox-processing queue.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decider::{WorkflowCommand, WorkflowEvent};

/// Stable identifier of a workflow instance.
///
/// Instance identity is caller-supplied (the routing function decides it),
/// so `WorkflowId` wraps a `String` rather than generating one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkflowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for WorkflowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 1-based, dense, strictly increasing position within one instance's stream.
///
/// Positions are assigned by persistence at append time; callers never
/// construct a `Position` for a message they are about to append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(i64);

impl Position {
    /// Sentinel passed to `read_stream` to mean "from the beginning"; never
    /// a message's own position, since positions are 1-based.
    pub const START: Position = Position(0);

    /// The position of the first message ever appended to a stream.
    pub const FIRST: Position = Position(1);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Position {
        Position(self.0 + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a message rebuilds state (`Event`) or is an instruction to execute
/// (`Command`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Command,
    Event,
}

/// Whether a message arrived from outside (`Input`) or was produced by the
/// decider (`Output`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

/// The payload carried by a [`WorkflowMessage`]: an external input, an
/// external-facing output command, or an audit event.
///
/// Keeping this as a typed enum (rather than collapsing straight to
/// `serde_json::Value`) preserves full fidelity at the in-process boundary;
/// the Postgres store still serializes it to JSON at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "payload_kind", rename_all = "snake_case")]
pub enum MessagePayload<I, O> {
    Input(I),
    Output(O),
    Audit(WorkflowEvent<I, O>),
}

/// One record in an instance's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMessage<I, O> {
    pub workflow_id: WorkflowId,
    pub position: Position,
    pub kind: Kind,
    pub direction: Direction,
    pub message: MessagePayload<I, O>,
    pub timestamp: DateTime<Utc>,
    /// Non-null iff `kind == Command && direction == Output`; `null`
    /// everywhere else, and immutable everywhere else.
    pub processed: Option<bool>,
    /// The delay a `Schedule` command was issued with; `None` for every other
    /// message. Carried alongside `message` rather than folded into
    /// `MessagePayload::Output` so the payload stays the bare domain output
    /// type everywhere else (what handlers and scenario assertions expect).
    pub scheduled_delay: Option<Duration>,
}

impl<I, O> WorkflowMessage<I, O> {
    /// A message is a pending output command iff its `processed` flag reads
    /// `Some(false)`. This is the filter `GetPendingCommandsAsync` applies.
    pub fn is_pending_command(&self) -> bool {
        matches!(
            (self.kind, self.direction, self.processed),
            (Kind::Command, Direction::Output, Some(false))
        )
    }
}

/// A message about to be appended, before persistence assigns it a position,
/// timestamp, and initial `processed` value.
///
/// Produced by [`crate::decider::Decider::translate`] for audit events and by
/// the decider's `Decide` step for output commands; also produced directly
/// by [`crate::router::InputRouter`] for external inputs.
#[derive(Debug, Clone)]
pub struct PendingMessage<I, O> {
    pub kind: Kind,
    pub direction: Direction,
    pub message: MessagePayload<I, O>,
    /// See [`WorkflowMessage::scheduled_delay`].
    pub scheduled_delay: Option<Duration>,
}

impl<I, O> PendingMessage<I, O> {
    pub fn input(message: I) -> Self {
        Self {
            kind: Kind::Command,
            direction: Direction::Input,
            message: MessagePayload::Input(message),
            scheduled_delay: None,
        }
    }

    pub fn input_event(message: I) -> Self {
        Self {
            kind: Kind::Event,
            direction: Direction::Input,
            message: MessagePayload::Input(message),
            scheduled_delay: None,
        }
    }

    pub fn audit(event: WorkflowEvent<I, O>) -> Self {
        Self {
            kind: Kind::Event,
            direction: Direction::Output,
            message: MessagePayload::Audit(event),
            scheduled_delay: None,
        }
    }

    /// An output command derived from a [`WorkflowCommand`]; every variant
    /// except the audit-only bookkeeping becomes a `Kind::Command` message
    /// with `processed = Some(false)` once appended. `Schedule`'s delay rides
    /// along in `scheduled_delay` rather than being folded into the payload,
    /// so `message` stays the bare domain output type for every command kind.
    pub fn output_command(command: &WorkflowCommand<O>) -> Option<Self>
    where
        O: Clone,
    {
        let (payload, scheduled_delay) = match command {
            WorkflowCommand::Send(out) | WorkflowCommand::Publish(out) | WorkflowCommand::Reply(out) => {
                (out.clone(), None)
            }
            WorkflowCommand::Schedule { delay, output } => (output.clone(), Some(*delay)),
            WorkflowCommand::Complete => return None,
        };
        Some(Self {
            kind: Kind::Command,
            direction: Direction::Output,
            message: MessagePayload::Output(payload),
            scheduled_delay,
        })
    }
}
