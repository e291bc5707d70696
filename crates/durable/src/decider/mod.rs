//! The decider core: pure, deterministic per-instance state machines.
//!
//! This module contains the sum types a workflow is built from ([`WorkflowEvent`],
//! [`WorkflowCommand`]) and the [`Decider`] trait that ties them to a state type.

mod command;
mod event;
mod workflow;

pub use command::WorkflowCommand;
pub use event::WorkflowEvent;
pub use workflow::Decider;
