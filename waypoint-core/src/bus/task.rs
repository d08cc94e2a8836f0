//! Background task abstraction

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::event::{Event, EventType};
use super::instructions::{InstructionId, InstructionQueue, RetryReport};
use crate::Result;

/// Identifier of a subscription on the task manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

/// What a task produced while handling an event
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    /// Text to include in the outbound response as-is
    Message(String),
    /// A template to render with extra context; rendering happens outside the bus
    Render {
        template: String,
        context: serde_json::Value,
    },
}

/// Subscription changes requested while tasks were being called
#[derive(Default)]
pub(crate) struct SubscriptionChanges {
    pub(crate) unsubscribe: Vec<SubscriptionId>,
    pub(crate) subscribe: Vec<(Box<dyn Task>, EventType)>,
}

/// The narrow view of the task manager handed to a task for one call
///
/// Tasks never hold on to the manager itself. Everything they can do to it
/// goes through this context, and subscription changes they request are
/// applied once the current dispatch has finished.
pub struct TaskContext<'a> {
    subscription: SubscriptionId,
    instructions: &'a mut InstructionQueue,
    changes: &'a mut SubscriptionChanges,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        subscription: SubscriptionId,
        instructions: &'a mut InstructionQueue,
        changes: &'a mut SubscriptionChanges,
    ) -> Self {
        Self {
            subscription,
            instructions,
            changes,
        }
    }

    /// Subscription the current call is made for
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Queue an untracked instruction for the agent
    pub fn queue_instruction(&mut self, content: impl Into<String>) {
        self.instructions.queue(content);
    }

    /// Queue an instruction that must be acknowledged
    pub fn queue_instruction_with_ack(
        &mut self,
        content: impl Into<String>,
        max_retries: u32,
    ) -> InstructionId {
        self.instructions.queue_with_ack(content, max_retries)
    }

    /// Acknowledge a tracked instruction; unknown ids are ignored
    pub fn acknowledge_instruction(&mut self, id: &InstructionId) -> bool {
        self.instructions.acknowledge(id)
    }

    /// Run one retry cycle over tracked instructions
    pub fn retry_pending(&mut self, now: Instant, min_dwell: Duration) -> RetryReport {
        self.instructions.retry_cycle(now, min_dwell)
    }

    /// Number of instructions waiting to be delivered
    pub fn pending_len(&self) -> usize {
        self.instructions.pending_len()
    }

    /// Remove this task's subscription after the current dispatch
    pub fn unsubscribe_self(&mut self) {
        let id = self.subscription;
        self.unsubscribe(id);
    }

    /// Remove a subscription after the current dispatch
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        if !self.changes.unsubscribe.contains(&id) {
            self.changes.unsubscribe.push(id);
        }
    }

    /// Subscribe another task after the current dispatch
    ///
    /// The new task does not see the event being dispatched, and it never
    /// gets an `on_init` call.
    pub fn subscribe(&mut self, task: impl Task + 'static, mask: EventType) {
        self.changes.subscribe.push((Box::new(task), mask));
    }
}

/// A background task reacting to bus events
#[async_trait]
pub trait Task: Send {
    /// Name used in logs and results
    fn name(&self) -> &'static str;

    /// Called once when the task manager is initialised, before any event
    async fn on_init(&mut self, _ctx: &mut TaskContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Handle an event matching the task's subscription mask
    ///
    /// Returning `Ok(None)` means the task had nothing to contribute.
    async fn handle_event(
        &mut self,
        event: &Event,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Option<TaskResult>>;
}
