//! A single order's lifecycle from placement through delivery or
//! cancellation. Exercises a decider with a linear happy path plus two
//! distinct cancellation triggers collapsing to the same terminal shape.

use std::time::Duration;

use async_trait::async_trait;
use durable_workflow::{Decider, WorkflowCommand, WorkflowEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderInput {
    PlaceOrder(String),
    PaymentReceived(String),
    OrderShipped(String, String),
    OrderDelivered(String),
    CancelOrder(String, String),
    PaymentTimeout(String),
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderOutput {
    ProcessPayment(String),
    NotifyOrderPlaced(String),
    PaymentTimeout(String),
    ShipOrder(String),
    NotifyOrderShipped(String, String),
    NotifyOrderDelivered(String),
    NotifyOrderCancelled(String, String),
    QueriedState(String),
}

impl durable_workflow::TaggedOutput for OrderOutput {
    fn variant_tag(&self) -> &'static str {
        match self {
            OrderOutput::ProcessPayment(_) => "process_payment",
            OrderOutput::NotifyOrderPlaced(_) => "notify_order_placed",
            OrderOutput::PaymentTimeout(_) => "payment_timeout",
            OrderOutput::ShipOrder(_) => "ship_order",
            OrderOutput::NotifyOrderShipped(_, _) => "notify_order_shipped",
            OrderOutput::NotifyOrderDelivered(_) => "notify_order_delivered",
            OrderOutput::NotifyOrderCancelled(_, _) => "notify_order_cancelled",
            OrderOutput::QueriedState(_) => "queried_state",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    New,
    AwaitingPayment { order_id: String },
    AwaitingShipment { order_id: String },
    Shipped { order_id: String, tracking: String },
    Delivered { order_id: String, tracking: String },
    Cancelled { order_id: String, reason: String },
}

impl Default for OrderState {
    fn default() -> Self {
        OrderState::New
    }
}

pub struct OrderFulfillmentDecider;

const PAYMENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[async_trait]
impl Decider for OrderFulfillmentDecider {
    const WORKFLOW_TYPE: &'static str = "order_fulfillment";
    type State = OrderState;
    type Input = OrderInput;
    type Output = OrderOutput;
    type Context = ();

    fn initial_state() -> Self::State {
        OrderState::New
    }

    async fn decide(
        &self,
        input: &Self::Input,
        state: &Self::State,
        _context: &Self::Context,
    ) -> Vec<WorkflowCommand<Self::Output>> {
        use OrderInput::*;
        use OrderState::*;

        match (input, state) {
            (PlaceOrder(id), New) => vec![
                WorkflowCommand::Send(OrderOutput::ProcessPayment(id.clone())),
                WorkflowCommand::Send(OrderOutput::NotifyOrderPlaced(id.clone())),
                WorkflowCommand::Schedule {
                    delay: PAYMENT_TIMEOUT,
                    output: OrderOutput::PaymentTimeout(id.clone()),
                },
            ],
            (PaymentReceived(_), AwaitingPayment { order_id }) => {
                vec![WorkflowCommand::Send(OrderOutput::ShipOrder(order_id.clone()))]
            }
            (OrderShipped(_, tracking), AwaitingShipment { order_id }) => {
                vec![WorkflowCommand::Send(OrderOutput::NotifyOrderShipped(
                    order_id.clone(),
                    tracking.clone(),
                ))]
            }
            (OrderDelivered(_), Shipped { order_id, .. }) => vec![
                WorkflowCommand::Send(OrderOutput::NotifyOrderDelivered(order_id.clone())),
                WorkflowCommand::Complete,
            ],
            (CancelOrder(_, by), AwaitingPayment { order_id }) => vec![
                WorkflowCommand::Send(OrderOutput::NotifyOrderCancelled(order_id.clone(), by.clone())),
                WorkflowCommand::Complete,
            ],
            (PaymentTimeout(_), AwaitingPayment { order_id }) => vec![
                WorkflowCommand::Send(OrderOutput::NotifyOrderCancelled(
                    order_id.clone(),
                    "Payment_Timeout".to_string(),
                )),
                WorkflowCommand::Complete,
            ],
            (Query(q), _) => vec![WorkflowCommand::Reply(OrderOutput::QueriedState(q.clone()))],
            // Terminal states and unrecognized (input, state) pairs decide nothing.
            _ => vec![],
        }
    }

    fn evolve(state: Self::State, event: &WorkflowEvent<Self::Input, Self::Output>) -> Self::State {
        use OrderState::*;
        use WorkflowEvent::*;

        match event {
            InitiatedBy(OrderInput::PlaceOrder(id)) => AwaitingPayment { order_id: id.clone() },
            Received(OrderInput::PaymentReceived(_)) => match state {
                AwaitingPayment { order_id } => AwaitingShipment { order_id },
                other => other,
            },
            Received(OrderInput::OrderShipped(_, tracking)) => match state {
                AwaitingShipment { order_id } => Shipped {
                    order_id,
                    tracking: tracking.clone(),
                },
                other => other,
            },
            Received(OrderInput::OrderDelivered(_)) => match state {
                Shipped { order_id, tracking } => Delivered { order_id, tracking },
                other => other,
            },
            Received(OrderInput::CancelOrder(_, by)) => match state {
                AwaitingPayment { order_id } => Cancelled {
                    order_id,
                    reason: by.clone(),
                },
                other => other,
            },
            Received(OrderInput::PaymentTimeout(_)) => match state {
                AwaitingPayment { order_id } => Cancelled {
                    order_id,
                    reason: "Payment_Timeout".to_string(),
                },
                other => other,
            },
            _ => state,
        }
    }
}
