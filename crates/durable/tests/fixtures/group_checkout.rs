//! Checks out a group of guests together, succeeding or reporting a partial
//! failure once every guest has resolved, or timing out with whichever
//! guests are still pending.

use async_trait::async_trait;
use durable_workflow::{Decider, WorkflowCommand, WorkflowEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupCheckoutInput {
    InitiateGroupCheckout(String, Vec<String>),
    GuestCheckedOut(String),
    GuestCheckoutFailed(String, String),
    TimeoutGroupCheckout(String),
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupCheckoutOutput {
    GroupCheckoutSucceeded(String, Vec<String>),
    GroupCheckoutFailed(String, Vec<String>, Vec<String>),
    GroupCheckoutTimedOut(String, Vec<String>),
    QueriedState(String),
}

impl durable_workflow::TaggedOutput for GroupCheckoutOutput {
    fn variant_tag(&self) -> &'static str {
        match self {
            GroupCheckoutOutput::GroupCheckoutSucceeded(..) => "group_checkout_succeeded",
            GroupCheckoutOutput::GroupCheckoutFailed(..) => "group_checkout_failed",
            GroupCheckoutOutput::GroupCheckoutTimedOut(..) => "group_checkout_timed_out",
            GroupCheckoutOutput::QueriedState(_) => "queried_state",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupCheckoutState {
    New,
    InProgress {
        group_id: String,
        pending: Vec<String>,
        completed: Vec<String>,
        failed: Vec<String>,
    },
    Finished,
}

impl Default for GroupCheckoutState {
    fn default() -> Self {
        GroupCheckoutState::New
    }
}

pub struct GroupCheckoutDecider;

#[async_trait]
impl Decider for GroupCheckoutDecider {
    const WORKFLOW_TYPE: &'static str = "group_checkout";
    type State = GroupCheckoutState;
    type Input = GroupCheckoutInput;
    type Output = GroupCheckoutOutput;
    type Context = ();

    fn initial_state() -> Self::State {
        GroupCheckoutState::New
    }

    async fn decide(
        &self,
        input: &Self::Input,
        state: &Self::State,
        _context: &Self::Context,
    ) -> Vec<WorkflowCommand<Self::Output>> {
        use GroupCheckoutInput::*;
        use GroupCheckoutState::*;

        match (input, state) {
            (InitiateGroupCheckout(_, _), New) => vec![],
            (GuestCheckedOut(guest), InProgress { group_id, pending, completed, failed }) => {
                let mut new_pending = pending.clone();
                new_pending.retain(|g| g != guest);
                if new_pending.is_empty() {
                    let mut new_completed = completed.clone();
                    new_completed.push(guest.clone());
                    if failed.is_empty() {
                        vec![
                            WorkflowCommand::Send(GroupCheckoutOutput::GroupCheckoutSucceeded(
                                group_id.clone(),
                                new_completed,
                            )),
                            WorkflowCommand::Complete,
                        ]
                    } else {
                        vec![
                            WorkflowCommand::Send(GroupCheckoutOutput::GroupCheckoutFailed(
                                group_id.clone(),
                                new_completed,
                                failed.clone(),
                            )),
                            WorkflowCommand::Complete,
                        ]
                    }
                } else {
                    vec![]
                }
            }
            (GuestCheckoutFailed(guest, _reason), InProgress { group_id, pending, completed, failed }) => {
                let mut new_pending = pending.clone();
                new_pending.retain(|g| g != guest);
                if new_pending.is_empty() {
                    let mut new_failed = failed.clone();
                    new_failed.push(guest.clone());
                    vec![
                        WorkflowCommand::Send(GroupCheckoutOutput::GroupCheckoutFailed(
                            group_id.clone(),
                            completed.clone(),
                            new_failed,
                        )),
                        WorkflowCommand::Complete,
                    ]
                } else {
                    vec![]
                }
            }
            (TimeoutGroupCheckout(_), InProgress { group_id, pending, .. }) => vec![
                WorkflowCommand::Send(GroupCheckoutOutput::GroupCheckoutTimedOut(
                    group_id.clone(),
                    pending.clone(),
                )),
                WorkflowCommand::Complete,
            ],
            (Query(q), _) => vec![WorkflowCommand::Reply(GroupCheckoutOutput::QueriedState(q.clone()))],
            _ => vec![],
        }
    }

    fn evolve(state: Self::State, event: &WorkflowEvent<Self::Input, Self::Output>) -> Self::State {
        use GroupCheckoutState::*;
        use WorkflowEvent::*;

        match event {
            InitiatedBy(GroupCheckoutInput::InitiateGroupCheckout(group_id, guests)) => InProgress {
                group_id: group_id.clone(),
                pending: guests.clone(),
                completed: Vec::new(),
                failed: Vec::new(),
            },
            Received(GroupCheckoutInput::GuestCheckedOut(guest)) => match state {
                InProgress { group_id, mut pending, mut completed, failed } => {
                    pending.retain(|g| g != guest);
                    completed.push(guest.clone());
                    InProgress { group_id, pending, completed, failed }
                }
                other => other,
            },
            Received(GroupCheckoutInput::GuestCheckoutFailed(guest, _)) => match state {
                InProgress { group_id, mut pending, completed, mut failed } => {
                    pending.retain(|g| g != guest);
                    failed.push(guest.clone());
                    InProgress { group_id, pending, completed, failed }
                }
                other => other,
            },
            Completed => Finished,
            _ => state,
        }
    }
}
