//! The input router: the sole writer of `Direction::Input` messages.
//!
//! The router, not the stream consumer, persists every external arrival. It
//! never calls `Decide` and never reads a stream — there is no `read_stream`
//! call anywhere in this module.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::{PendingMessage, Position, WorkflowId};
use crate::persistence::{StoreError, WorkflowMessageStore};

/// An internal signal naming the instance a consumer should process, and the
/// position the triggering append just wrote (consumers may ignore this and
/// always re-read from the start; it exists for consumers that want to
/// short-circuit when they already know they're caught up past it).
#[derive(Debug, Clone)]
pub struct ProcessingTrigger {
    pub workflow_id: WorkflowId,
    pub from_position: Position,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    /// No consumer is listening for triggers any more; the append still
    /// succeeded, so this is reported separately from a `Store` failure.
    #[error("processing trigger channel closed")]
    TriggerChannelClosed,
}

/// Routes external arrivals to the target instance's stream and signals a
/// consumer to process them.
///
/// `route_fn` must be pure and total over the messages this workflow type
/// accepts: same input, same `WorkflowId`, always.
pub struct InputRouter<I, O, S> {
    store: Arc<S>,
    route_fn: Arc<dyn Fn(&I) -> WorkflowId + Send + Sync>,
    triggers: mpsc::Sender<ProcessingTrigger>,
    _output: PhantomData<fn() -> O>,
}

impl<I, O, S> InputRouter<I, O, S>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
    S: WorkflowMessageStore<I, O>,
{
    pub fn new(
        store: Arc<S>,
        route_fn: impl Fn(&I) -> WorkflowId + Send + Sync + 'static,
        triggers: mpsc::Sender<ProcessingTrigger>,
    ) -> Self {
        Self {
            store,
            route_fn: Arc::new(route_fn),
            triggers,
            _output: PhantomData,
        }
    }

    /// Routes an external *command* input: `Kind::Command, Direction::Input`.
    #[tracing::instrument(skip(self, input))]
    pub async fn route_command(&self, input: I) -> Result<Position, RouterError> {
        self.route(PendingMessage::input(input)).await
    }

    /// Routes an external *event* input: `Kind::Event, Direction::Input`.
    #[tracing::instrument(skip(self, input))]
    pub async fn route_event(&self, input: I) -> Result<Position, RouterError> {
        self.route(PendingMessage::input_event(input)).await
    }

    async fn route(&self, message: PendingMessage<I, O>) -> Result<Position, RouterError> {
        let input = match &message.message {
            crate::message::MessagePayload::Input(input) => input.clone(),
            _ => unreachable!("route() is only ever called with PendingMessage::input(_)/input_event(_)"),
        };
        let workflow_id = (self.route_fn)(&input);

        let position = self.store.append(&workflow_id, vec![message]).await?;
        tracing::info!(workflow_id = %workflow_id, position = position.get(), "routed external input");

        self.triggers
            .send(ProcessingTrigger {
                workflow_id,
                from_position: position,
            })
            .await
            .map_err(|_| RouterError::TriggerChannelClosed)?;

        Ok(position)
    }
}
