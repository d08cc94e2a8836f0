//! Waypoint Core - workflow coordination for agent sessions
//!
//! This crate keeps an agent inside a consent-gated sequence of development
//! phases. It watches the workflow state file, routes events through a
//! bit-flag event bus to background tasks, and delivers instructions to the
//! agent with acknowledgement tracking and escalating retries.

pub mod bus;
pub mod config;
pub mod error;
pub mod guidance;
pub mod response;
pub mod tasks;
pub mod workflow;

pub use bus::{Event, EventData, EventType, InstructionId, TaskManager, TaskResult};
pub use config::Config;
pub use error::{Error, Result};
pub use guidance::{ContentRenderer, DirectoryRenderer, NullRenderer, StaticRenderer};
pub use response::{compose_messages, compose_response, OutboundResponse};
pub use tasks::{register_default_tasks, TaskOptions};
pub use workflow::{
    resolve_phase_sequence, PhaseSequence, TransitionPermission, WorkflowFlag, WorkflowMonitor,
    WorkflowState,
};
