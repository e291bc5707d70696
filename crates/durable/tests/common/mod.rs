//! In-memory collaborator test doubles for `MessageBus`/`Scheduler`: record
//! calls in a `parking_lot::Mutex<Vec<_>>` and expose a plain accessor for
//! assertions, no mocking framework.

use std::time::Duration;

use async_trait::async_trait;
use durable_workflow::{HandlerError, MessageBus, Scheduler};
use parking_lot::Mutex;

#[derive(Default)]
pub struct InMemoryMessageBus<O> {
    sent: Mutex<Vec<O>>,
    published: Mutex<Vec<O>>,
}

impl<O: Clone> InMemoryMessageBus<O> {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<O> {
        self.sent.lock().clone()
    }

    pub fn published(&self) -> Vec<O> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl<O: Clone + Send + Sync> MessageBus<O> for InMemoryMessageBus<O> {
    async fn send(&self, message: &O) -> Result<(), HandlerError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn publish(&self, message: &O) -> Result<(), HandlerError> {
        self.published.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryScheduler<O> {
    scheduled: Mutex<Vec<(O, Duration)>>,
}

impl<O: Clone> InMemoryScheduler<O> {
    pub fn new() -> Self {
        Self {
            scheduled: Mutex::new(Vec::new()),
        }
    }

    pub fn scheduled(&self) -> Vec<(O, Duration)> {
        self.scheduled.lock().clone()
    }
}

#[async_trait]
impl<O: Clone + Send + Sync> Scheduler<O> for InMemoryScheduler<O> {
    async fn schedule(&self, message: &O, delay: Duration) -> Result<(), HandlerError> {
        self.scheduled.lock().push((message.clone(), delay));
        Ok(())
    }
}
