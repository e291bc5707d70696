//! The persistence interface: the only contract the decider core and the
//! runtime pieces above it depend on. Five operations, generic over a
//! workflow's own `Input`/`Output` types the same way
//! [`crate::message::WorkflowMessage`] is.

use async_trait::async_trait;

use crate::message::{PendingMessage, Position, WorkflowId, WorkflowMessage};

/// Errors a [`WorkflowMessageStore`] implementation may report.
///
/// `ConcurrencyConflict` on `mark_command_processed` is deliberately absent:
/// losing the race to mark a command processed is not an error, so that
/// method returns `Ok(false)` rather than this variant for the losing caller.
/// `ConcurrencyConflict` here covers the append path instead (a backend that
/// cannot serialize concurrent appends on one instance).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced instance has no stream.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// An append was rejected because it would have violated a data-model
    /// invariant — a backend bug, never a caller mistake.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A backend could not serialize two concurrent appends to the same
    /// instance and asks the caller to retry the whole cycle.
    #[error("concurrency conflict appending to {0}")]
    ConcurrencyConflict(WorkflowId),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload failed to (de)serialize at the storage boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The unified persistence interface: inbox, outbox, audit log, and
/// outbox-processing queue all live behind these five operations, since they
/// are all views over the same per-instance [`WorkflowMessage`] stream.
///
/// Implementations must provide:
/// - per-instance append linearizability (concurrent `append` calls on the
///   same `workflow_id` serialize; no interleaving of their messages),
/// - dense, monotonically increasing positions,
/// - atomic, exactly-one-winner `mark_command_processed`,
/// - read-your-writes within an instance.
#[async_trait]
pub trait WorkflowMessageStore<I, O>: Send + Sync
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Atomically assigns dense positions to `messages`, stamps `processed`
    /// per field 3 of the invariants (`Some(false)` for output commands,
    /// `None` elsewhere), stamps timestamps, and commits them as one unit.
    /// Returns the position of the last message appended.
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        messages: Vec<PendingMessage<I, O>>,
    ) -> Result<Position, StoreError>;

    /// All messages with `position >= from_position`, in position order.
    /// `Position::START` (0) returns the whole stream.
    async fn read_stream(
        &self,
        workflow_id: &WorkflowId,
        from_position: Position,
    ) -> Result<Vec<WorkflowMessage<I, O>>, StoreError>;

    /// Output commands with `processed == Some(false)`, optionally scoped to
    /// one instance, in position order per instance.
    async fn get_pending_commands(
        &self,
        workflow_id: Option<&WorkflowId>,
    ) -> Result<Vec<WorkflowMessage<I, O>>, StoreError>;

    /// Conditional update: succeeds only if the target message is
    /// `Kind::Command, Direction::Output, processed == Some(false)`.
    /// Idempotent with respect to an already-processed command (returns
    /// `Ok(false)`, not an error).
    async fn mark_command_processed(
        &self,
        workflow_id: &WorkflowId,
        position: Position,
    ) -> Result<bool, StoreError>;

    /// Whether `workflow_id` has ever had a message appended.
    async fn exists(&self, workflow_id: &WorkflowId) -> Result<bool, StoreError>;

    /// Remove all history for `workflow_id`, atomically.
    async fn delete(&self, workflow_id: &WorkflowId) -> Result<(), StoreError>;
}
