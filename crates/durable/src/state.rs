//! The per-instance state machine.
//!
//! Represented as a plain three-variant enum computed on demand from the
//! stream, never stored as separate durable state. Whether the instance
//! exists plus the presence of a `Completed` audit event fully determine it.

use crate::decider::WorkflowEvent;
use crate::message::{MessagePayload, Position, WorkflowId};
use crate::persistence::{StoreError, WorkflowMessageStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// No stream has been appended yet.
    Latent,
    /// At least one input has been processed and no `Complete` command has
    /// been emitted.
    ActiveStarted,
    /// A `Complete` command was emitted; the instance is terminal.
    /// Observational only — further inputs are still accepted and still
    /// advance the stream with `Received` events.
    Terminated,
}

/// Computes [`InstanceState`] for `workflow_id` by reading its stream.
pub async fn instance_state<I, O, S>(
    store: &S,
    workflow_id: &WorkflowId,
) -> Result<InstanceState, StoreError>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    S: WorkflowMessageStore<I, O>,
{
    if !store.exists(workflow_id).await? {
        return Ok(InstanceState::Latent);
    }

    let stream = store.read_stream(workflow_id, Position::START).await?;
    let terminated = stream
        .iter()
        .any(|m| matches!(&m.message, MessagePayload::Audit(WorkflowEvent::Completed)));

    Ok(if terminated {
        InstanceState::Terminated
    } else {
        InstanceState::ActiveStarted
    })
}
