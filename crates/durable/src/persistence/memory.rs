//! The in-memory reference implementation: the semantic source of truth used
//! in tests and benchmarks.
//!
//! One lock per instance inside a top-level map, defensive clones on every
//! read, so concurrent appends to *different* instances never contend with
//! each other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::message::{Direction, Kind, PendingMessage, Position, WorkflowId, WorkflowMessage};

use super::store::{StoreError, WorkflowMessageStore};

struct InstanceLog<I, O> {
    messages: Vec<WorkflowMessage<I, O>>,
    next_position: Position,
}

impl<I, O> InstanceLog<I, O> {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_position: Position::FIRST,
        }
    }
}

/// `workflow_id -> (messages, next_position)`, one inner lock per instance.
pub struct InMemoryWorkflowMessageStore<I, O> {
    instances: RwLock<HashMap<WorkflowId, Arc<Mutex<InstanceLog<I, O>>>>>,
}

impl<I, O> Default for InMemoryWorkflowMessageStore<I, O> {
    fn default() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }
}

impl<I, O> InMemoryWorkflowMessageStore<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the per-instance lock, creating a fresh empty log on first use.
    /// A read-lock fast path avoids taking the map's write lock for every
    /// append once the instance already exists.
    fn instance_lock(&self, workflow_id: &WorkflowId) -> Arc<Mutex<InstanceLog<I, O>>> {
        if let Some(log) = self.instances.read().get(workflow_id) {
            return log.clone();
        }
        self.instances
            .write()
            .entry(workflow_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(InstanceLog::new())))
            .clone()
    }
}

#[async_trait]
impl<I, O> WorkflowMessageStore<I, O> for InMemoryWorkflowMessageStore<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    #[tracing::instrument(skip(self, messages), fields(workflow_id = %workflow_id, count = messages.len()))]
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        messages: Vec<PendingMessage<I, O>>,
    ) -> Result<Position, StoreError> {
        if messages.is_empty() {
            return Err(StoreError::InvariantViolation(
                "append called with zero messages".into(),
            ));
        }

        let lock = self.instance_lock(workflow_id);
        // The lock guard is held for the whole batch and nothing inside this
        // block awaits, so this *is* the per-instance serialization point:
        // two concurrent `append` calls on the same instance cannot
        // interleave their messages.
        let mut log = lock.lock();
        let now = Utc::now();
        let mut last_position = log.next_position;

        for pending in messages {
            let position = log.next_position;
            let processed = match (pending.kind, pending.direction) {
                (Kind::Command, Direction::Output) => Some(false),
                _ => None,
            };
            log.messages.push(WorkflowMessage {
                workflow_id: workflow_id.clone(),
                position,
                kind: pending.kind,
                direction: pending.direction,
                message: pending.message,
                timestamp: now,
                processed,
                scheduled_delay: pending.scheduled_delay,
            });
            last_position = position;
            log.next_position = position.next();
        }

        tracing::debug!(last_position = last_position.get(), "appended messages");
        Ok(last_position)
    }

    async fn read_stream(
        &self,
        workflow_id: &WorkflowId,
        from_position: Position,
    ) -> Result<Vec<WorkflowMessage<I, O>>, StoreError> {
        let Some(lock) = self.instances.read().get(workflow_id).cloned() else {
            return Ok(Vec::new());
        };
        let log = lock.lock();
        Ok(log
            .messages
            .iter()
            .filter(|m| m.position.get() >= from_position.get())
            .cloned()
            .collect())
    }

    async fn get_pending_commands(
        &self,
        workflow_id: Option<&WorkflowId>,
    ) -> Result<Vec<WorkflowMessage<I, O>>, StoreError> {
        let mut pending = Vec::new();
        match workflow_id {
            Some(id) => {
                if let Some(lock) = self.instances.read().get(id).cloned() {
                    let log = lock.lock();
                    pending.extend(log.messages.iter().filter(|m| m.is_pending_command()).cloned());
                }
            }
            None => {
                // Snapshot the set of per-instance locks first so we don't
                // hold the map lock while locking each instance in turn.
                let locks: Vec<_> = self.instances.read().values().cloned().collect();
                for lock in locks {
                    let log = lock.lock();
                    pending.extend(log.messages.iter().filter(|m| m.is_pending_command()).cloned());
                }
            }
        }
        // Position order per instance, stable across instances.
        pending.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id).then(a.position.cmp(&b.position)));
        Ok(pending)
    }

    #[tracing::instrument(skip(self), fields(workflow_id = %workflow_id, position = position.get()))]
    async fn mark_command_processed(
        &self,
        workflow_id: &WorkflowId,
        position: Position,
    ) -> Result<bool, StoreError> {
        let Some(lock) = self.instances.read().get(workflow_id).cloned() else {
            return Ok(false);
        };
        let mut log = lock.lock();
        let Some(message) = log.messages.iter_mut().find(|m| m.position == position) else {
            return Ok(false);
        };
        if message.kind != Kind::Command || message.direction != Direction::Output {
            return Ok(false);
        }
        if message.processed != Some(false) {
            // Already claimed (or not a command at all): not an error, just
            // a lost race.
            return Ok(false);
        }
        message.processed = Some(true);
        tracing::debug!("claimed pending command");
        Ok(true)
    }

    async fn exists(&self, workflow_id: &WorkflowId) -> Result<bool, StoreError> {
        Ok(self.instances.read().contains_key(workflow_id))
    }

    async fn delete(&self, workflow_id: &WorkflowId) -> Result<(), StoreError> {
        self.instances.write().remove(workflow_id);
        Ok(())
    }
}
