//! The pure, single-cycle orchestrator.
//!
//! The fold is a free function with zero I/O dependencies: `orchestrate`
//! takes nothing but values and returns nothing but values, so determinism
//! is a plain synchronous unit test, no store or runtime involved.

use crate::decider::{Decider, WorkflowCommand, WorkflowEvent};

/// A decider's state together with the audit-event history that produced it.
pub struct Snapshot<D: Decider> {
    pub state: D::State,
    pub event_history: Vec<WorkflowEvent<D::Input, D::Output>>,
}

// Implemented by hand rather than derived: `#[derive(Clone)]` would add an
// unnecessary `D: Clone` bound, since only the associated types need it.
impl<D: Decider> Clone for Snapshot<D> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            event_history: self.event_history.clone(),
        }
    }
}

impl<D: Decider> std::fmt::Debug for Snapshot<D>
where
    D::State: std::fmt::Debug,
    D::Input: std::fmt::Debug,
    D::Output: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("state", &self.state)
            .field("event_history", &self.event_history)
            .finish()
    }
}

impl<D: Decider> Snapshot<D> {
    pub fn initial() -> Self {
        Self {
            state: D::initial_state(),
            event_history: Vec::new(),
        }
    }

    /// Rebuild a snapshot by folding a stream's audit events through
    /// `Evolve`, starting from `InitialState`. This is the consumer's replay
    /// path, and also the reference an incrementally-maintained snapshot can
    /// be checked against.
    pub fn replay(events: Vec<WorkflowEvent<D::Input, D::Output>>) -> Self {
        let state = events
            .iter()
            .fold(D::initial_state(), |state, event| D::evolve(state, event));
        Self {
            state,
            event_history: events,
        }
    }

    /// Whether a `Began` event has already been recorded, i.e. whether the
    /// next input processed is a continuation rather than the begins-append.
    pub fn has_begun(&self) -> bool {
        self.event_history.iter().any(WorkflowEvent::is_began)
    }
}

/// The result of one orchestrator cycle.
pub struct CycleOutcome<D: Decider> {
    pub snapshot: Snapshot<D>,
    pub commands: Vec<WorkflowCommand<D::Output>>,
    pub new_events: Vec<WorkflowEvent<D::Input, D::Output>>,
}

/// Run one decider cycle: `Decide` → `Translate` → fold through `Evolve`.
///
/// No I/O, no clock other than whatever is embedded in `message` itself.
/// Retry is not this function's concern: a caller that wants to retry simply
/// calls it again with the same arguments, which is always safe because
/// `decide`/`evolve`/`translate` are deterministic.
pub async fn orchestrate<D: Decider>(
    decider: &D,
    snapshot: Snapshot<D>,
    message: &D::Input,
    begins: bool,
    context: &D::Context,
) -> CycleOutcome<D> {
    let commands = decider.decide(message, &snapshot.state, context).await;
    let new_events = D::translate(begins, message, &commands);

    let new_state = new_events
        .iter()
        .fold(snapshot.state, |state, event| D::evolve(state, event));

    let mut event_history = snapshot.event_history;
    event_history.extend(new_events.iter().cloned());

    CycleOutcome {
        snapshot: Snapshot {
            state: new_state,
            event_history,
        },
        commands,
        new_events,
    }
}
