//! The decider contract: `InitialState`, `Decide`, `Evolve`, `Translate`.
//!
//! `Decide` is the single suspending entry point: a purely synchronous
//! decider is simply one whose `decide` body never awaits, so there is no
//! separate sync/async decider split to maintain.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{WorkflowCommand, WorkflowEvent};

/// A deterministic, event-sourced workflow definition.
///
/// `evolve` and `translate` are plain functions: nothing about them may
/// suspend. Only `decide` is declared `async`, so that workflows needing a
/// typed collaborator can await it; workflows that don't need one simply
/// never `.await` inside `decide`.
#[async_trait]
pub trait Decider: Send + Sync + 'static {
    /// Unique type identifier, used as the routing/registry key.
    const WORKFLOW_TYPE: &'static str;

    /// The workflow's state sum type.
    type State: Clone + Send + Sync + 'static;

    /// The type of messages that arrive as input.
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// The type of messages the decider emits as output commands.
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Typed collaborator made available to `decide`. Defaults to `()` for
    /// workflows with no external dependency.
    type Context: Send + Sync;

    /// The state a fresh instance starts in, before any event is folded.
    fn initial_state() -> Self::State;

    /// Pure (modulo the optional typed `context`), deterministic: returns the
    /// ordered commands to issue in response to `input` in `state`.
    ///
    /// Must not panic on an in-range input; an input this decider does not
    /// recognize in the given state returns `vec![]` rather than erroring.
    async fn decide(
        &self,
        input: &Self::Input,
        state: &Self::State,
        context: &Self::Context,
    ) -> Vec<WorkflowCommand<Self::Output>>;

    /// Fold one audit event into the state. Must handle every variant
    /// `translate` can produce for this decider; Rust's exhaustive `match`
    /// makes an unhandled variant a compile error rather than a runtime
    /// fatal error.
    fn evolve(state: Self::State, event: &WorkflowEvent<Self::Input, Self::Output>) -> Self::State;

    /// Produce the audit-event sequence for one cycle. Identical across
    /// every decider, so it is given a default implementation here rather
    /// than reimplemented per workflow.
    fn translate(
        begins: bool,
        input: &Self::Input,
        commands: &[WorkflowCommand<Self::Output>],
    ) -> Vec<WorkflowEvent<Self::Input, Self::Output>> {
        let mut events = Vec::with_capacity(commands.len() + 2);
        if begins {
            events.push(WorkflowEvent::Began);
            events.push(WorkflowEvent::InitiatedBy(input.clone()));
        } else {
            events.push(WorkflowEvent::Received(input.clone()));
        }
        for command in commands {
            events.push(match command.clone() {
                WorkflowCommand::Send(out) => WorkflowEvent::Sent(out),
                WorkflowCommand::Publish(out) => WorkflowEvent::Published(out),
                WorkflowCommand::Schedule { delay, output } => {
                    WorkflowEvent::Scheduled { after: delay, output }
                }
                WorkflowCommand::Reply(out) => WorkflowEvent::Replied(out),
                WorkflowCommand::Complete => WorkflowEvent::Completed,
            });
        }
        events
    }
}
