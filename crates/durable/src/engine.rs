//! The engine facade: wires an [`InputRouter`], a trigger-driven
//! [`StreamConsumer`] pool, and an [`OutputProcessor`] into one running
//! service.
//!
//! Grounded on `worker::pool::WorkerPool::spawn`'s `JoinHandle` bookkeeping
//! and `watch`-channel shutdown, generalized from "spawn N poller tasks
//! pulling from one queue" to "spawn N consumer tasks pulling from one
//! trigger channel, plus one output-processor task."

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::consumer::{ConsumeOutcome, ConsumerError, StreamConsumer};
use crate::decider::Decider;
use crate::dispatch::{HandlerRegistry, TaggedOutput};
use crate::output_processor::{OutputProcessor, OutputProcessorConfig};
use crate::persistence::WorkflowMessageStore;
use crate::router::{InputRouter, ProcessingTrigger};

/// Configuration for the part of the engine that consumes triggers:
/// how many triggers can queue before `route` backpressures, and how many
/// consumer tasks drain them concurrently.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub trigger_channel_capacity: usize,
    pub consumer_parallelism: usize,
    pub output_processor: OutputProcessorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger_channel_capacity: 1024,
            consumer_parallelism: 4,
            output_processor: OutputProcessorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_trigger_channel_capacity(mut self, capacity: usize) -> Self {
        self.trigger_channel_capacity = capacity;
        self
    }

    pub fn with_consumer_parallelism(mut self, parallelism: usize) -> Self {
        self.consumer_parallelism = parallelism.max(1);
        self
    }

    pub fn with_output_processor(mut self, config: OutputProcessorConfig) -> Self {
        self.output_processor = config;
        self
    }
}

/// A running engine: an [`InputRouter`] handle callers use to submit work,
/// plus the background tasks it started. Dropping this does not stop the
/// tasks; call [`Engine::shutdown`] for a graceful stop.
pub struct Engine<D: Decider, S> {
    router: Arc<InputRouter<D::Input, D::Output, S>>,
    consumer_tasks: Vec<JoinHandle<()>>,
    output_task: JoinHandle<()>,
    output_shutdown: watch::Sender<bool>,
}

impl<D, S> Engine<D, S>
where
    D: Decider,
    D::Output: TaggedOutput + Clone,
    S: WorkflowMessageStore<D::Input, D::Output> + 'static,
{
    /// Starts `consumer_parallelism` consumer tasks and one output-processor
    /// task, and returns a router handle for submitting external input.
    ///
    /// `route_fn` must be pure and total: the same input always maps to the
    /// same instance.
    pub fn start(
        decider: Arc<D>,
        store: Arc<S>,
        context: D::Context,
        registry: HandlerRegistry<D::Output>,
        route_fn: impl Fn(&D::Input) -> crate::message::WorkflowId + Send + Sync + 'static,
        config: EngineConfig,
    ) -> Self
    where
        D::Context: Clone,
    {
        let (trigger_tx, trigger_rx) = mpsc::channel::<ProcessingTrigger>(config.trigger_channel_capacity);
        let router = Arc::new(InputRouter::new(store.clone(), route_fn, trigger_tx));

        let consumer = Arc::new(StreamConsumer::new(decider, store.clone(), context));
        let consumer_tasks = spawn_consumer_pool(consumer, trigger_rx, config.consumer_parallelism);

        let output_processor = Arc::new(OutputProcessor::new(
            store,
            Arc::new(registry),
            config.output_processor,
        ));
        let output_shutdown = output_processor.shutdown_handle();
        let output_task = tokio::spawn(async move { output_processor.run().await });

        Self {
            router,
            consumer_tasks,
            output_task,
            output_shutdown,
        }
    }

    pub fn router(&self) -> Arc<InputRouter<D::Input, D::Output, S>> {
        self.router.clone()
    }

    /// Stops the output processor and waits for every consumer task and the
    /// output-processor task to finish their current work.
    pub async fn shutdown(self) {
        let _ = self.output_shutdown.send(true);
        let _ = self.output_task.await;
        for task in self.consumer_tasks {
            let _ = task.await;
        }
    }
}

/// Spawns `parallelism` tasks sharing one trigger receiver behind a mutex, so
/// triggers for distinct instances drain concurrently while the consumer's
/// own per-instance lock table still serializes same-instance triggers.
fn spawn_consumer_pool<D, S>(
    consumer: Arc<StreamConsumer<D, S>>,
    trigger_rx: mpsc::Receiver<ProcessingTrigger>,
    parallelism: usize,
) -> Vec<JoinHandle<()>>
where
    D: Decider,
    S: WorkflowMessageStore<D::Input, D::Output> + 'static,
{
    let trigger_rx = Arc::new(tokio::sync::Mutex::new(trigger_rx));
    (0..parallelism)
        .map(|worker_index| {
            let consumer = consumer.clone();
            let trigger_rx = trigger_rx.clone();
            tokio::spawn(async move {
                loop {
                    let trigger = {
                        let mut rx = trigger_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(trigger) = trigger else {
                        tracing::info!(worker_index, "consumer pool worker exiting: trigger channel closed");
                        return;
                    };

                    match consumer.process_trigger(&trigger.workflow_id).await {
                        Ok(ConsumeOutcome::Processed { cycles, last_position }) => {
                            tracing::debug!(
                                workflow_id = %trigger.workflow_id,
                                cycles,
                                last_position = last_position.get(),
                                "consumer pool worker drained trigger"
                            );
                        }
                        Ok(ConsumeOutcome::NoUnprocessedInput) => {}
                        Err(ConsumerError::Cancelled) => {}
                        Err(err) => {
                            tracing::error!(workflow_id = %trigger.workflow_id, error = %err, "trigger processing failed");
                        }
                    }
                }
            })
        })
        .collect()
}

/// How long [`Engine::shutdown`] is typically given to finish in-flight work
/// before a caller gives up waiting.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
