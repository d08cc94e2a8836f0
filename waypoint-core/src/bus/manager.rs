//! Task manager: the event bus
//!
//! Owns every background task for the life of the process together with the
//! outbound instruction queue. Events are delivered to each task whose
//! subscription mask intersects the event kind, in subscription order. A
//! failing task is logged and skipped; it never stops the others.

use super::event::{Event, EventData, EventType};
use super::instructions::{InstructionId, InstructionQueue};
use super::task::{SubscriptionChanges, SubscriptionId, Task, TaskContext, TaskResult};
use crate::{Error, Result};

struct Subscription {
    id: SubscriptionId,
    mask: EventType,
    task: Box<dyn Task>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// A non-empty result contributed by one task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// Name of the task that produced it
    pub task: &'static str,
    /// The result itself
    pub result: TaskResult,
}

/// Aggregate result of one dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Number of tasks the event was delivered to, failed ones included
    pub processed: usize,
    /// Every non-empty result, in subscription order
    pub results: Vec<TaskOutcome>,
}

/// The event bus
pub struct TaskManager {
    subscriptions: Vec<Subscription>,
    instructions: InstructionQueue,
    next_id: u64,
    lifecycle: Lifecycle,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    /// Create an empty task manager
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            instructions: InstructionQueue::new(),
            next_id: 0,
            lifecycle: Lifecycle::Created,
        }
    }

    /// Register a task for the kinds in `mask`
    ///
    /// Tasks subscribed after `init` do not get an `on_init` call.
    pub fn subscribe(&mut self, task: impl Task + 'static, mask: EventType) -> SubscriptionId {
        self.subscribe_boxed(Box::new(task), mask)
    }

    fn subscribe_boxed(&mut self, task: Box<dyn Task>, mask: EventType) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        tracing::debug!(task = task.name(), mask = %mask, "Task subscribed");
        if self.lifecycle == Lifecycle::Running {
            tracing::debug!(task = task.name(), "Subscribed after init; on_init will not run");
        }

        self.subscriptions.push(Subscription { id, mask, task });
        id
    }

    /// Remove a subscription, dropping its task
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| {
            if s.id == id {
                tracing::debug!(task = s.task.name(), "Task unsubscribed");
                false
            } else {
                true
            }
        });
        self.subscriptions.len() != before
    }

    /// Names of subscribed tasks, in subscription order
    pub fn task_names(&self) -> Vec<&'static str> {
        self.subscriptions.iter().map(|s| s.task.name()).collect()
    }

    /// Whether `init` has run and `shutdown` has not
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Give every task its one `on_init` call
    ///
    /// Calling `init` again is a no-op.
    pub async fn init(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Running => {
                tracing::debug!("Task manager already initialised");
                return Ok(());
            }
            Lifecycle::Stopped => {
                return Err(Error::Bus("cannot init after shutdown".to_string()));
            }
            Lifecycle::Created => {}
        }

        let mut changes = SubscriptionChanges::default();
        for sub in self.subscriptions.iter_mut() {
            let mut ctx = TaskContext::new(sub.id, &mut self.instructions, &mut changes);
            if let Err(e) = sub.task.on_init(&mut ctx).await {
                tracing::warn!(task = sub.task.name(), error = %e, "Task failed during init");
            }
        }
        self.apply_changes(changes);

        self.lifecycle = Lifecycle::Running;
        tracing::info!(tasks = self.subscriptions.len(), "Task manager initialised");
        Ok(())
    }

    /// Deliver an event to every interested task
    pub async fn dispatch(&mut self, kind: EventType, data: EventData) -> Result<DispatchOutcome> {
        match self.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Created => {
                return Err(Error::Bus(format!("dispatch of {} before init", kind)));
            }
            Lifecycle::Stopped => {
                return Err(Error::Bus(format!("dispatch of {} after shutdown", kind)));
            }
        }

        let event = Event::new(kind, data);
        let mut outcome = DispatchOutcome::default();
        let mut changes = SubscriptionChanges::default();

        for sub in self.subscriptions.iter_mut() {
            if !sub.mask.intersects(kind) {
                continue;
            }
            outcome.processed += 1;

            let mut ctx = TaskContext::new(sub.id, &mut self.instructions, &mut changes);
            match sub.task.handle_event(&event, &mut ctx).await {
                Ok(Some(result)) => outcome.results.push(TaskOutcome {
                    task: sub.task.name(),
                    result,
                }),
                Ok(None) => {}
                Err(e) => {
                    let failure = Error::Task {
                        task: sub.task.name().to_string(),
                        message: e.to_string(),
                    };
                    tracing::warn!(event = %kind, error = %failure, "Event handler failed");
                }
            }
        }
        self.apply_changes(changes);

        tracing::trace!(
            event = %kind,
            processed = outcome.processed,
            results = outcome.results.len(),
            "Event dispatched"
        );
        Ok(outcome)
    }

    fn apply_changes(&mut self, changes: SubscriptionChanges) {
        for id in changes.unsubscribe {
            self.unsubscribe(id);
        }
        for (task, mask) in changes.subscribe {
            self.subscribe_boxed(task, mask);
        }
    }

    /// Discard all tasks and every pending or tracked instruction
    pub fn shutdown(&mut self) {
        let (pending, tracked) = self.instructions.clear();
        let tasks = self.subscriptions.len();
        self.subscriptions.clear();
        self.lifecycle = Lifecycle::Stopped;
        tracing::info!(tasks, pending, tracked, "Task manager shut down");
    }

    /// Queue an untracked instruction
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

    /// Take every pending instruction for the next outbound response
    pub fn drain_pending(&mut self) -> Vec<String> {
        self.instructions.drain()
    }

    /// Read-only view of the instruction queue
    pub fn instructions(&self) -> &InstructionQueue {
        &self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        reply: Option<String>,
    }

    #[async_trait]
    impl Task for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_init(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:init", self.name));
            ctx.queue_instruction(format!("hello from {}", self.name));
            Ok(())
        }

        async fn handle_event(
            &mut self,
            event: &Event,
            _ctx: &mut TaskContext<'_>,
        ) -> Result<Option<TaskResult>> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.kind));
            Ok(self.reply.clone().map(TaskResult::Message))
        }
    }

    struct Failing;

    #[async_trait]
    impl Task for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle_event(
            &mut self,
            _event: &Event,
            _ctx: &mut TaskContext<'_>,
        ) -> Result<Option<TaskResult>> {
            Err(Error::Other("boom".to_string()))
        }
    }

    struct OneShot;

    #[async_trait]
    impl Task for OneShot {
        fn name(&self) -> &'static str {
            "one-shot"
        }

        async fn handle_event(
            &mut self,
            _event: &Event,
            ctx: &mut TaskContext<'_>,
        ) -> Result<Option<TaskResult>> {
            ctx.unsubscribe_self();
            Ok(Some(TaskResult::Message("once".to_string())))
        }
    }

    struct Spawner {
        log: Log,
        spawned: bool,
    }

    #[async_trait]
    impl Task for Spawner {
        fn name(&self) -> &'static str {
            "spawner"
        }

        async fn handle_event(
            &mut self,
            _event: &Event,
            ctx: &mut TaskContext<'_>,
        ) -> Result<Option<TaskResult>> {
            if !self.spawned {
                self.spawned = true;
                ctx.subscribe(recorder("late", &self.log, None), EventType::CONSENT);
            }
            Ok(None)
        }
    }

    fn recorder(name: &'static str, log: &Log, reply: Option<&str>) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
            reply: reply.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_dispatch_respects_masks_and_order() {
        let log: Log = Arc::default();
        let mut bus = TaskManager::new();
        bus.subscribe(recorder("a", &log, None), EventType::TIMER);
        bus.subscribe(recorder("b", &log, None), EventType::FILE_CHANGED);
        bus.subscribe(
            recorder("c", &log, None),
            EventType::TIMER | EventType::FILE_CHANGED,
        );
        bus.init().await.unwrap();
        log.lock().unwrap().clear();

        let outcome = bus
            .dispatch(EventType::FILE_CHANGED, EventData::Empty)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["b:FILE_CHANGED".to_string(), "c:FILE_CHANGED".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_counted() {
        let log: Log = Arc::default();
        let mut bus = TaskManager::new();
        bus.subscribe(recorder("first", &log, Some("one")), EventType::TIMER);
        bus.subscribe(Failing, EventType::TIMER);
        bus.subscribe(recorder("last", &log, Some("two")), EventType::TIMER);
        bus.init().await.unwrap();

        let outcome = bus.dispatch(EventType::TIMER, EventData::Empty).await.unwrap();
        assert_eq!(outcome.processed, 3);
        assert_eq!(
            outcome.results,
            vec![
                TaskOutcome {
                    task: "first",
                    result: TaskResult::Message("one".to_string()),
                },
                TaskOutcome {
                    task: "last",
                    result: TaskResult::Message("two".to_string()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_init_runs_once_before_dispatch() {
        let log: Log = Arc::default();
        let mut bus = TaskManager::new();
        bus.subscribe(recorder("a", &log, None), EventType::TIMER);

        assert!(matches!(
            bus.dispatch(EventType::TIMER, EventData::Empty).await,
            Err(Error::Bus(_))
        ));

        bus.init().await.unwrap();
        bus.init().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:init".to_string()]);
        assert_eq!(bus.drain_pending(), vec!["hello from a"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_dispatch_is_deferred() {
        let log: Log = Arc::default();
        let mut bus = TaskManager::new();
        bus.subscribe(OneShot, EventType::CONSENT);
        bus.subscribe(recorder("after", &log, None), EventType::CONSENT);
        bus.init().await.unwrap();

        let outcome = bus.dispatch(EventType::CONSENT, EventData::Empty).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(bus.task_names(), vec!["after"]);

        let outcome = bus.dispatch(EventType::CONSENT, EventData::Empty).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe() {
        let log: Log = Arc::default();
        let mut bus = TaskManager::new();
        let id = bus.subscribe(recorder("a", &log, None), EventType::ALL);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(bus.task_names().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_discards_instructions() {
        let mut bus = TaskManager::new();
        bus.init().await.unwrap();
        bus.queue_instruction("plain");
        let id = bus.queue_instruction_with_ack("check X", 3);
        assert_eq!(bus.instructions().tracked_len(), 1);

        bus.shutdown();
        assert!(!bus.is_running());
        assert!(bus.drain_pending().is_empty());
        assert!(!bus.acknowledge_instruction(&id));
        assert!(bus.dispatch(EventType::TIMER, EventData::Empty).await.is_err());
        assert!(bus.init().await.is_err());
    }

    #[tokio::test]
    async fn test_public_queue_api_dedups() {
        let mut bus = TaskManager::new();
        let a = bus.queue_instruction_with_ack("check X", 3);
        let b = bus.queue_instruction_with_ack("check X", 3);
        assert_eq!(a, b);
        assert_eq!(bus.drain_pending(), vec!["check X"]);
        assert!(bus.acknowledge_instruction(&a));
    }

    #[tokio::test]
    async fn test_subscribe_during_dispatch_starts_with_next_event() {
        let log: Log = Arc::default();
        let mut bus = TaskManager::new();
        bus.subscribe(
            Spawner {
                log: Arc::clone(&log),
                spawned: false,
            },
            EventType::CONSENT,
        );
        bus.init().await.unwrap();

        let outcome = bus.dispatch(EventType::CONSENT, EventData::Empty).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.task_names(), vec!["spawner", "late"]);

        let outcome = bus.dispatch(EventType::CONSENT, EventData::Empty).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(*log.lock().unwrap(), vec!["late:CONSENT".to_string()]);
        assert_eq!(bus.task_names().len(), 2);
    }
}
