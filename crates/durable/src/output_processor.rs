//! The output processor: a background worker that finds pending output
//! commands across streams, claims and dispatches each to its registered
//! handler, and marks it processed.
//!
//! A `tokio::sync::watch` shutdown channel, an idle-backoff poll loop, and
//! `Semaphore`-bounded concurrent dispatch.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, Semaphore};

use crate::dispatch::{HandlerContext, HandlerRegistry, TaggedOutput};
use crate::message::{MessagePayload, WorkflowId, WorkflowMessage};
use crate::persistence::{StoreError, WorkflowMessageStore};

/// Both orderings are permitted; the choice is configured, not hardcoded.
/// Default is `ClaimBeforeExecute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPolicy {
    /// Mark processed, then execute. At-most-once: a crash between mark and
    /// dispatch loses the invocation, but two workers can never both run the
    /// same command.
    ClaimBeforeExecute,
    /// Execute, then mark processed. At-least-once: a crash after execute
    /// but before mark causes the command to be retried, so handlers under
    /// this policy must be strictly idempotent.
    ExecuteBeforeClaim,
}

impl Default for MarkPolicy {
    fn default() -> Self {
        Self::ClaimBeforeExecute
    }
}

/// Builder-style config with a `with_*` method per field.
#[derive(Debug, Clone)]
pub struct OutputProcessorConfig {
    pub output_poll_interval: Duration,
    pub max_pending_commands_per_batch: usize,
    pub max_concurrent_dispatch: usize,
    pub mark_policy: MarkPolicy,
    /// `None` polls pending commands across all instances; `Some` scopes to
    /// one (useful for a per-instance test or a sharded deployment).
    pub scope: Option<WorkflowId>,
}

impl Default for OutputProcessorConfig {
    fn default() -> Self {
        Self {
            output_poll_interval: Duration::from_secs(1),
            max_pending_commands_per_batch: 100,
            max_concurrent_dispatch: 10,
            mark_policy: MarkPolicy::default(),
            scope: None,
        }
    }
}

impl OutputProcessorConfig {
    pub fn with_output_poll_interval(mut self, interval: Duration) -> Self {
        self.output_poll_interval = interval;
        self
    }

    pub fn with_max_pending_commands_per_batch(mut self, max: usize) -> Self {
        self.max_pending_commands_per_batch = max;
        self
    }

    pub fn with_max_concurrent_dispatch(mut self, max: usize) -> Self {
        self.max_concurrent_dispatch = max;
        self
    }

    pub fn with_mark_policy(mut self, policy: MarkPolicy) -> Self {
        self.mark_policy = policy;
        self
    }

    pub fn with_scope(mut self, workflow_id: WorkflowId) -> Self {
        self.scope = Some(workflow_id);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutputProcessorError {
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),
}

/// Polls `S` for pending output commands and dispatches each through a
/// [`HandlerRegistry`]. Safe to run many instances concurrently, on one
/// process or many — `mark_command_processed`'s atomicity is what makes
/// concurrent pollers safe.
pub struct OutputProcessor<I, O, S> {
    store: Arc<S>,
    registry: Arc<HandlerRegistry<O>>,
    config: OutputProcessorConfig,
    semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    _input: PhantomData<fn() -> I>,
}

impl<I, O, S> OutputProcessor<I, O, S>
where
    I: Send + Sync + 'static,
    O: TaggedOutput + Clone + Send + Sync + 'static,
    S: WorkflowMessageStore<I, O> + 'static,
{
    pub fn new(store: Arc<S>, registry: Arc<HandlerRegistry<O>>, config: OutputProcessorConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_dispatch.max(1)));
        Self {
            store,
            registry,
            config,
            semaphore,
            shutdown_tx,
            shutdown_rx,
            _input: PhantomData,
        }
    }

    /// A clone of the shutdown sender; calling `send(true)` stops [`Self::run`]
    /// after its current poll.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// One poll cycle: fetch pending commands, claim-and-dispatch each,
    /// return how many this call actually executed (0 means nothing was
    /// pending, or every pending command lost its claim race to another
    /// poller).
    ///
    /// Commands are grouped by `workflow_id` first; each group runs in its
    /// own task, dispatching that instance's commands one at a time in the
    /// position order `get_pending_commands` returned them in. This is what
    /// makes "within an instance, pending commands are delivered to handlers
    /// in position order when processed by a single worker" true for a batch
    /// that happens to contain more than one pending command for the same
    /// instance. Different instances' groups still run concurrently, bounded
    /// by the semaphore, giving "across instances, order is independent" for
    /// free.
    #[tracing::instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<usize, OutputProcessorError> {
        let pending = self
            .store
            .get_pending_commands(self.config.scope.as_ref())
            .await?;

        let batch: Vec<_> = pending
            .into_iter()
            .take(self.config.max_pending_commands_per_batch)
            .collect();

        if batch.is_empty() {
            return Ok(0);
        }

        let mut groups: Vec<(WorkflowId, Vec<WorkflowMessage<I, O>>)> = Vec::new();
        for message in batch {
            match groups.last_mut() {
                Some((workflow_id, messages)) if *workflow_id == message.workflow_id => {
                    messages.push(message);
                }
                _ => groups.push((message.workflow_id.clone(), vec![message])),
            }
        }

        let mut tasks = Vec::with_capacity(groups.len());
        for (_, messages) in groups {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("output processor semaphore is never closed");
            let store = self.store.clone();
            let registry = self.registry.clone();
            let mark_policy = self.config.mark_policy;
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let mut handled = 0usize;
                for message in messages {
                    match dispatch_one(&*store, &*registry, message, mark_policy).await {
                        Ok(true) => handled += 1,
                        Ok(false) => {}
                        Err(err) => tracing::warn!(error = %err, "pending-command dispatch failed"),
                    }
                }
                handled
            }));
        }

        let mut handled = 0;
        for task in tasks {
            match task.await {
                Ok(n) => handled += n,
                Err(join_err) => tracing::error!(error = %join_err, "dispatch task panicked"),
            }
        }
        Ok(handled)
    }

    /// Polls forever at `output_poll_interval` (plus jitter, to desynchronize
    /// multiple pollers) until the shutdown handle fires, draining
    /// immediately again whenever a poll found work rather than sleeping.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("output processor shutting down");
                return;
            }

            match self.poll_once().await {
                Ok(0) => {
                    let jitter_ms = rand::thread_rng().gen_range(0..100);
                    let sleep = self.config.output_poll_interval + Duration::from_millis(jitter_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(sleep) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Ok(_) => {
                    // Work was found; poll again immediately rather than idling.
                }
                Err(err) => {
                    tracing::warn!(error = %err, "poll failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.output_poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }
    }
}

/// Claims and dispatches one pending command per the configured
/// [`MarkPolicy`]. Returns whether *this* call executed the handler
/// (`false` means it lost a claim race to a concurrent poller).
async fn dispatch_one<I, O, S>(
    store: &S,
    registry: &HandlerRegistry<O>,
    message: WorkflowMessage<I, O>,
    mark_policy: MarkPolicy,
) -> Result<bool, OutputProcessorError>
where
    O: TaggedOutput + Clone,
    S: WorkflowMessageStore<I, O>,
{
    let MessagePayload::Output(output) = &message.message else {
        // Not actually an output command; `get_pending_commands` should
        // never hand us one of these, but tolerate it rather than panic.
        return Ok(false);
    };
    let tag = output.variant_tag();
    let ctx = HandlerContext::default().with_scheduled_delay(message.scheduled_delay);

    match mark_policy {
        MarkPolicy::ClaimBeforeExecute => {
            let claimed = store
                .mark_command_processed(&message.workflow_id, message.position)
                .await?;
            if !claimed {
                return Ok(false);
            }
            if let Err(err) = registry.dispatch(tag, output, &ctx).await {
                tracing::error!(
                    workflow_id = %message.workflow_id,
                    position = message.position.get(),
                    error = %err,
                    "handler failed after claim; command stays processed, operator must resubmit",
                );
            }
            Ok(true)
        }
        MarkPolicy::ExecuteBeforeClaim => match registry.dispatch(tag, output, &ctx).await {
            Ok(()) => {
                let claimed = store
                    .mark_command_processed(&message.workflow_id, message.position)
                    .await?;
                Ok(claimed)
            }
            Err(err) => {
                tracing::warn!(
                    workflow_id = %message.workflow_id,
                    position = message.position.get(),
                    error = %err,
                    "handler failed before claim; will retry on next poll",
                );
                Ok(false)
            }
        },
    }
}
