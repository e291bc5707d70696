//! # Durable Workflow Engine
//!
//! An event-sourced workflow orchestration engine built around a single
//! idea: one append-only per-instance message stream is simultaneously an
//! instance's inbox, its outbox, its audit log, and its outbox-processing
//! queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        InputRouter                           │
//! │  (appends external arrivals, signals a processing trigger)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       StreamConsumer                          │
//! │  (Decide → Translate → Evolve, per instance, under a lock)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowMessageStore                       │
//! │  (in-memory or Postgres: one append-only stream per instance)│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     OutputProcessor                           │
//! │  (claims pending output commands, dispatches to handlers)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use durable_workflow::prelude::*;
//!
//! #[derive(Debug, Clone, Default)]
//! struct OrderState;
//!
//! struct OrderDecider;
//!
//! #[async_trait::async_trait]
//! impl Decider for OrderDecider {
//!     const WORKFLOW_TYPE: &'static str = "order";
//!     type State = OrderState;
//!     type Input = OrderInput;
//!     type Output = OrderOutput;
//!     type Context = ();
//!
//!     fn initial_state() -> Self::State { OrderState::default() }
//!
//!     async fn decide(&self, input: &Self::Input, state: &Self::State, _ctx: &()) -> Vec<WorkflowCommand<Self::Output>> {
//!         vec![]
//!     }
//!
//!     fn evolve(state: Self::State, _event: &WorkflowEvent<Self::Input, Self::Output>) -> Self::State {
//!         state
//!     }
//! }
//! ```

pub mod consumer;
pub mod decider;
pub mod dispatch;
pub mod engine;
pub mod message;
pub mod orchestrator;
pub mod output_processor;
pub mod persistence;
pub mod router;
pub mod state;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::consumer::{ConsumeOutcome, ConsumerError, StreamConsumer};
    pub use crate::decider::{Decider, WorkflowCommand, WorkflowEvent};
    pub use crate::dispatch::{
        CommandHandler, HandlerContext, HandlerError, HandlerRegistry, MessageBus,
        MessageBusDispatcher, Scheduler, SchedulerDispatcher, TaggedOutput,
    };
    pub use crate::engine::{Engine, EngineConfig};
    pub use crate::message::{
        Direction, Kind, MessagePayload, PendingMessage, Position, WorkflowId, WorkflowMessage,
    };
    pub use crate::orchestrator::{orchestrate, CycleOutcome, Snapshot};
    pub use crate::output_processor::{MarkPolicy, OutputProcessor, OutputProcessorConfig, OutputProcessorError};
    pub use crate::persistence::{
        InMemoryWorkflowMessageStore, PostgresWorkflowMessageStore, StoreError, WorkflowMessageStore,
    };
    pub use crate::router::{InputRouter, ProcessingTrigger, RouterError};
    pub use crate::state::{instance_state, InstanceState};
}

// Re-export key types at crate root.
pub use consumer::{ConsumeOutcome, ConsumerError, StreamConsumer};
pub use decider::{Decider, WorkflowCommand, WorkflowEvent};
pub use dispatch::{
    CommandHandler, HandlerContext, HandlerError, HandlerRegistry, MessageBus, MessageBusDispatcher,
    Scheduler, SchedulerDispatcher, TaggedOutput,
};
pub use engine::{Engine, EngineConfig};
pub use message::{Direction, Kind, MessagePayload, PendingMessage, Position, WorkflowId, WorkflowMessage};
pub use orchestrator::{orchestrate, CycleOutcome, Snapshot};
pub use output_processor::{MarkPolicy, OutputProcessor, OutputProcessorConfig, OutputProcessorError};
pub use persistence::{InMemoryWorkflowMessageStore, PostgresWorkflowMessageStore, StoreError, WorkflowMessageStore};
pub use router::{InputRouter, ProcessingTrigger, RouterError};
pub use state::{instance_state, InstanceState};
