//! Command-handler dispatch: a type-keyed registry mapping output command
//! variants to handler functions, plus the `MessageBus`/`Scheduler`
//! collaborator traits that sit at the crate boundary.
//!
//! `HandlerContext` carries only a cancellation handle; there is no
//! bounded-retry/heartbeat concept at this layer, so nothing else is needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Context handed to every [`CommandHandler`] invocation.
///
/// `scheduled_delay` is `Some` only when the command being dispatched came
/// from a `WorkflowCommand::Schedule { delay, .. }`: the decider's delay for
/// that specific command, carried from the stream through to the one handler
/// (typically a [`SchedulerDispatcher`]) that needs it.
#[derive(Clone)]
pub struct HandlerContext {
    cancellation: CancellationToken,
    scheduled_delay: Option<Duration>,
}

impl HandlerContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            scheduled_delay: None,
        }
    }

    pub fn with_scheduled_delay(mut self, delay: Option<Duration>) -> Self {
        self.scheduled_delay = delay;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn scheduled_delay(&self) -> Option<Duration> {
        self.scheduled_delay
    }
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// No handler is registered for this output's variant tag.
    #[error("no handler registered for command kind {0:?}")]
    Unregistered(&'static str),

    /// The handler ran but refused the command on business grounds — not a
    /// panic, not a transport failure, just "I looked at this and no".
    #[error("handler rejected command: {0}")]
    Rejected(String),

    /// The collaborator (message bus, scheduler) the handler delegates to
    /// failed transiently.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

/// Lets a workflow's output sum type name its own wire/registry key. The
/// same string `#[serde(tag = "type")]` already produces, so a
/// `HandlerRegistry` lookup and the wire discriminator never drift apart.
/// Typically derived by hand alongside the `Output` enum (see the test
/// fixtures under `tests/fixtures`), since `serde`'s internally-tagged-enum
/// representation has no public API to read the tag back out of a value.
pub trait TaggedOutput {
    fn variant_tag(&self) -> &'static str;
}

/// One unit of output-command execution. Implementations are expected to be
/// idempotent: under `claim-before-execute` a crash between claim and
/// dispatch means the handler simply never runs again for that command, and
/// under `execute-before-claim` the same command can run more than once.
#[async_trait]
pub trait CommandHandler<O>: Send + Sync {
    async fn handle(&self, message: &O, ctx: &HandlerContext) -> Result<(), HandlerError>;
}

/// A type-keyed registry. Keyed by the output's variant tag — the same
/// string `#[serde(tag = "type")]` already produces on the wire, so the
/// registry key and the wire discriminator never drift apart.
pub struct HandlerRegistry<O> {
    handlers: HashMap<&'static str, Box<dyn CommandHandler<O>>>,
}

impl<O> Default for HandlerRegistry<O> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<O> HandlerRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, variant_tag: &'static str, handler: impl CommandHandler<O> + 'static) -> &mut Self {
        self.handlers.insert(variant_tag, Box::new(handler));
        self
    }

    #[tracing::instrument(skip(self, message, ctx))]
    pub async fn dispatch(&self, variant_tag: &'static str, message: &O, ctx: &HandlerContext) -> Result<(), HandlerError> {
        match self.handlers.get(variant_tag) {
            Some(handler) => handler.handle(message, ctx).await,
            None => Err(HandlerError::Unregistered(variant_tag)),
        }
    }
}

/// The message-bus collaborator: `Send`/`Publish` targets, at-least-once. A
/// transport-layer detail; only the interface lives in this crate.
#[async_trait]
pub trait MessageBus<O>: Send + Sync {
    async fn send(&self, message: &O) -> Result<(), HandlerError>;
    async fn publish(&self, message: &O) -> Result<(), HandlerError>;
}

/// The scheduler collaborator: re-delivers a message as a new external input
/// after `delay`, at-least-once.
#[async_trait]
pub trait Scheduler<O>: Send + Sync {
    async fn schedule(&self, message: &O, delay: Duration) -> Result<(), HandlerError>;
}

/// Default composite dispatcher for `Send`/`Publish`: delegates straight to
/// the message-bus collaborator. Registered under the `"send"`/`"publish"`
/// variant tags by the embedding application.
pub struct MessageBusDispatcher<O> {
    bus: Arc<dyn MessageBus<O>>,
    publish: bool,
}

impl<O> MessageBusDispatcher<O> {
    pub fn send(bus: Arc<dyn MessageBus<O>>) -> Self {
        Self { bus, publish: false }
    }

    pub fn publish(bus: Arc<dyn MessageBus<O>>) -> Self {
        Self { bus, publish: true }
    }
}

#[async_trait]
impl<O: Send + Sync> CommandHandler<O> for MessageBusDispatcher<O> {
    async fn handle(&self, message: &O, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        if self.publish {
            self.bus.publish(message).await
        } else {
            self.bus.send(message).await
        }
    }
}

/// Default composite dispatcher for `Schedule`: delegates to the scheduler
/// collaborator. Registered under the `"schedule"` variant tag.
pub struct SchedulerDispatcher<O> {
    scheduler: Arc<dyn Scheduler<O>>,
    delay: Duration,
}

impl<O> SchedulerDispatcher<O> {
    pub fn new(scheduler: Arc<dyn Scheduler<O>>, delay: Duration) -> Self {
        Self { scheduler, delay }
    }
}

#[async_trait]
impl<O: Send + Sync> CommandHandler<O> for SchedulerDispatcher<O> {
    /// Uses `ctx.scheduled_delay()` (the decider's per-command delay) when
    /// present, falling back to the delay this dispatcher was built with.
    async fn handle(&self, message: &O, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let delay = ctx.scheduled_delay().unwrap_or(self.delay);
        self.scheduler.schedule(message, delay).await
    }
}
