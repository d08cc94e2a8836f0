//! Event bus for background tasks
//!
//! Producers (the state file poller, the retry timer, the transport) hand
//! events to the [`TaskManager`], which fans them out to subscribed tasks.
//! Tasks talk back to the manager only through a per-call [`TaskContext`].

mod event;
mod instructions;
mod manager;
mod task;

pub use event::{Event, EventData, EventType};
pub use instructions::{
    InstructionId, InstructionQueue, RetryReport, TrackedInstruction, IMPORTANT_PREFIX,
    URGENT_PREFIX,
};
pub use manager::{DispatchOutcome, TaskManager, TaskOutcome};
pub use task::{SubscriptionId, Task, TaskContext, TaskResult};
