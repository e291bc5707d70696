//! The stream consumer: drives the decider over one instance's stream under
//! per-instance mutual exclusion.
//!
//! Structured as a load → replay → decide → append loop, built around the
//! pure [`crate::orchestrator::orchestrate`] call so that replaying state and
//! deciding what to append next are separated from the act of appending.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::decider::{Decider, WorkflowCommand, WorkflowEvent};
use crate::message::{Direction, MessagePayload, PendingMessage, Position, WorkflowId, WorkflowMessage};
use crate::orchestrator::{orchestrate, Snapshot};
use crate::persistence::{StoreError, WorkflowMessageStore};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    /// A `Decider` implementation panicked during a cycle; caught via
    /// `catch_unwind` rather than taking the whole process down. The
    /// instance's stream is untouched and safe to retry, since the cycle
    /// simply did not append.
    #[error("decider panicked: {0}")]
    DeciderPanicked(String),

    /// The consumer was cancelled before it could acquire the per-instance
    /// lock or finish a cycle; the caller should not treat this as an error
    /// requiring repair, just a retry on the next trigger.
    #[error("cancelled")]
    Cancelled,
}

/// What one call to [`StreamConsumer::process_trigger`] did.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// No input was found after the last already-processed one; nothing to do.
    NoUnprocessedInput,
    /// `cycles` decider cycles ran, ending at `last_position`.
    Processed { cycles: usize, last_position: Position },
}

/// Drives `D` over one instance's stream at a time, serialized per instance
/// via an in-process lock table (`advisory_lock_style: in-process`).
pub struct StreamConsumer<D: Decider, S> {
    decider: Arc<D>,
    store: Arc<S>,
    context: D::Context,
    locks: DashMap<WorkflowId, Arc<tokio::sync::Mutex<()>>>,
}

impl<D, S> StreamConsumer<D, S>
where
    D: Decider,
    S: WorkflowMessageStore<D::Input, D::Output>,
{
    pub fn new(decider: Arc<D>, store: Arc<S>, context: D::Context) -> Self {
        Self {
            decider,
            store,
            context,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, workflow_id: &WorkflowId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(workflow_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Processes all unprocessed input currently on `workflow_id`'s stream,
    /// holding the instance's lock for the whole drain.
    #[tracing::instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn process_trigger(&self, workflow_id: &WorkflowId) -> Result<ConsumeOutcome, ConsumerError> {
        self.process_trigger_cancellable(workflow_id, &CancellationToken::new()).await
    }

    /// Same as [`Self::process_trigger`], but releases the lock (without
    /// appending) and returns [`ConsumerError::Cancelled`] if `cancellation`
    /// fires before a cycle completes.
    pub async fn process_trigger_cancellable(
        &self,
        workflow_id: &WorkflowId,
        cancellation: &CancellationToken,
    ) -> Result<ConsumeOutcome, ConsumerError> {
        let lock = self.lock_for(workflow_id);
        let _guard = tokio::select! {
            guard = lock.lock() => guard,
            _ = cancellation.cancelled() => return Err(ConsumerError::Cancelled),
        };

        let stream = self.store.read_stream(workflow_id, Position::START).await?;

        let events: Vec<WorkflowEvent<D::Input, D::Output>> = stream
            .iter()
            .filter_map(|m| match &m.message {
                MessagePayload::Audit(event) => Some(event.clone()),
                _ => None,
            })
            .collect();
        let mut snapshot = Snapshot::<D>::replay(events);

        let already_consumed = snapshot
            .event_history
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::Received(_) | WorkflowEvent::InitiatedBy(_)))
            .count();

        let inputs: Vec<&WorkflowMessage<D::Input, D::Output>> = stream
            .iter()
            .filter(|m| m.direction == Direction::Input)
            .collect();

        if already_consumed >= inputs.len() {
            return Ok(ConsumeOutcome::NoUnprocessedInput);
        }

        let mut cycles = 0usize;
        let mut last_position = stream.last().map(|m| m.position).unwrap_or(Position::START);

        for message in &inputs[already_consumed..] {
            if cancellation.is_cancelled() {
                return Err(ConsumerError::Cancelled);
            }

            let input = match &message.message {
                MessagePayload::Input(input) => input.clone(),
                _ => {
                    return Err(ConsumerError::Store(StoreError::InvariantViolation(format!(
                        "message at position {} has Direction::Input but no Input payload",
                        message.position
                    ))))
                }
            };

            let begins = !snapshot.has_begun();

            let outcome = AssertUnwindSafe(orchestrate(&*self.decider, snapshot, &input, begins, &self.context))
                .catch_unwind()
                .await
                .map_err(|panic| ConsumerError::DeciderPanicked(describe_panic(panic)))?;

            let to_append = co_append_batch(begins, &outcome.new_events, &outcome.commands);
            last_position = self.store.append(workflow_id, to_append).await?;

            snapshot = outcome.snapshot;
            cycles += 1;

            tracing::info!(cycle = cycles, begins, last_position = last_position.get(), "processed one decider cycle");
        }

        Ok(ConsumeOutcome::Processed { cycles, last_position })
    }
}

/// Builds the batch for one `append` call: the audit events first (so the
/// begins-append's `Began`/`InitiatedBy` land at positions 1 and 2), each
/// immediately followed by its corresponding output command message if the
/// command produces one (invariant 6: command and audit event co-appended;
/// `Complete` produces an audit event only, no command message).
fn co_append_batch<I, O>(
    begins: bool,
    events: &[WorkflowEvent<I, O>],
    commands: &[WorkflowCommand<O>],
) -> Vec<PendingMessage<I, O>>
where
    I: Clone,
    O: Clone,
{
    let leading = if begins { 2 } else { 1 };
    let mut batch = Vec::with_capacity(events.len() + commands.len());

    for (index, event) in events.iter().enumerate() {
        batch.push(PendingMessage::audit(event.clone()));
        if index >= leading {
            let command = &commands[index - leading];
            if let Some(command_message) = PendingMessage::output_command(command) {
                batch.push(command_message);
            }
        }
    }
    batch
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowMessageStore;
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    enum Input {
        Place,
        Cancel,
    }
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    enum Output {
        Notified,
    }
    #[derive(Debug, Clone, Default, PartialEq)]
    enum State {
        #[default]
        New,
        Placed,
        Cancelled,
    }

    struct TinyDecider;

    #[async_trait]
    impl Decider for TinyDecider {
        const WORKFLOW_TYPE: &'static str = "tiny";
        type State = State;
        type Input = Input;
        type Output = Output;
        type Context = ();

        fn initial_state() -> Self::State {
            State::New
        }

        async fn decide(
            &self,
            input: &Self::Input,
            state: &Self::State,
            _context: &Self::Context,
        ) -> Vec<WorkflowCommand<Self::Output>> {
            match (input, state) {
                (Input::Place, State::New) => vec![WorkflowCommand::Send(Output::Notified)],
                (Input::Cancel, State::Placed) => {
                    vec![WorkflowCommand::Send(Output::Notified), WorkflowCommand::Complete]
                }
                _ => vec![],
            }
        }

        fn evolve(state: Self::State, event: &WorkflowEvent<Self::Input, Self::Output>) -> Self::State {
            match event {
                WorkflowEvent::InitiatedBy(Input::Place) => State::Placed,
                WorkflowEvent::Received(Input::Cancel) => State::Cancelled,
                _ => state,
            }
        }
    }

    #[tokio::test]
    async fn first_trigger_begins_and_appends_began_initiated_by_sent() {
        let store = Arc::new(InMemoryWorkflowMessageStore::<Input, Output>::new());
        let id = WorkflowId::new("order-1");
        store.append(&id, vec![PendingMessage::input(Input::Place)]).await.unwrap();

        let consumer = StreamConsumer::new(Arc::new(TinyDecider), store.clone(), ());
        let outcome = consumer.process_trigger(&id).await.unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Processed { cycles: 1, .. }));

        let stream = store.read_stream(&id, Position::START).await.unwrap();
        // input, Began, InitiatedBy, Sent, command
        assert_eq!(stream.len(), 5);
        assert!(matches!(stream[1].message, MessagePayload::Audit(WorkflowEvent::Began)));
        assert!(matches!(stream[2].message, MessagePayload::Audit(WorkflowEvent::InitiatedBy(Input::Place))));
    }

    #[tokio::test]
    async fn second_trigger_drains_only_the_new_input() {
        let store = Arc::new(InMemoryWorkflowMessageStore::<Input, Output>::new());
        let id = WorkflowId::new("order-1");
        store.append(&id, vec![PendingMessage::input(Input::Place)]).await.unwrap();

        let consumer = StreamConsumer::new(Arc::new(TinyDecider), store.clone(), ());
        consumer.process_trigger(&id).await.unwrap();

        store.append(&id, vec![PendingMessage::input(Input::Cancel)]).await.unwrap();
        let outcome = consumer.process_trigger(&id).await.unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Processed { cycles: 1, .. }));

        let stream = store.read_stream(&id, Position::START).await.unwrap();
        assert!(stream
            .iter()
            .any(|m| matches!(&m.message, MessagePayload::Audit(WorkflowEvent::Completed))));
    }

    #[tokio::test]
    async fn no_unprocessed_input_is_a_no_op() {
        let store = Arc::new(InMemoryWorkflowMessageStore::<Input, Output>::new());
        let id = WorkflowId::new("order-1");
        store.append(&id, vec![PendingMessage::input(Input::Place)]).await.unwrap();

        let consumer = StreamConsumer::new(Arc::new(TinyDecider), store.clone(), ());
        consumer.process_trigger(&id).await.unwrap();

        let outcome = consumer.process_trigger(&id).await.unwrap();
        assert!(matches!(outcome, ConsumeOutcome::NoUnprocessedInput));
    }

    #[tokio::test]
    async fn zero_commands_still_advances_past_the_input() {
        let store = Arc::new(InMemoryWorkflowMessageStore::<Input, Output>::new());
        let id = WorkflowId::new("order-1");
        // Cancel while still New: decide() returns [] (unrecognized pair).
        store.append(&id, vec![PendingMessage::input(Input::Cancel)]).await.unwrap();

        let consumer = StreamConsumer::new(Arc::new(TinyDecider), store.clone(), ());
        let outcome = consumer.process_trigger(&id).await.unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Processed { cycles: 1, .. }));

        let stream = store.read_stream(&id, Position::START).await.unwrap();
        // input, Began, InitiatedBy -- no output command appended.
        assert_eq!(stream.len(), 3);
        assert!(!stream.iter().any(|m| m.direction == Direction::Output && m.kind == crate::message::Kind::Command));

        // A second trigger with no new input is a no-op.
        assert!(matches!(
            consumer.process_trigger(&id).await.unwrap(),
            ConsumeOutcome::NoUnprocessedInput
        ));
    }

    #[tokio::test]
    async fn concurrent_triggers_on_the_same_instance_never_interleave_cycles() {
        let store = Arc::new(InMemoryWorkflowMessageStore::<Input, Output>::new());
        let id = WorkflowId::new("order-1");
        store.append(&id, vec![PendingMessage::input(Input::Place)]).await.unwrap();

        let consumer = Arc::new(StreamConsumer::new(Arc::new(TinyDecider), store.clone(), ()));
        let a = {
            let consumer = consumer.clone();
            let id = id.clone();
            tokio::spawn(async move { consumer.process_trigger(&id).await })
        };
        let b = {
            let consumer = consumer.clone();
            let id = id.clone();
            tokio::spawn(async move { consumer.process_trigger(&id).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let stream = store.read_stream(&id, Position::START).await.unwrap();
        // Exactly one Began/InitiatedBy pair, regardless of which trigger won.
        let begun = stream
            .iter()
            .filter(|m| matches!(&m.message, MessagePayload::Audit(WorkflowEvent::Began)))
            .count();
        assert_eq!(begun, 1);
    }
}
