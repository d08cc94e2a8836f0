//! Built-in background tasks
//!
//! Tasks are registered explicitly through [`register_default_tasks`];
//! there is no discovery step.

mod capabilities;
mod retry;
mod workflow;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use capabilities::{CapabilityProbeTask, CAPABILITIES_COMMAND, CAPABILITIES_TEMPLATE};
pub use retry::RetryTask;
pub use workflow::WorkflowMonitorTask;

use crate::bus::{EventType, SubscriptionId, TaskManager};
use crate::config::Config;
use crate::guidance::ContentRenderer;
use crate::workflow::{PhaseSequence, WorkflowMonitor};
use crate::Result;

/// Settings the built-in tasks are created with
#[derive(Clone)]
pub struct TaskOptions {
    /// Workflow state file to monitor
    pub state_file: PathBuf,
    /// Phase sequence; `None` disables workflow monitoring
    pub sequence: Option<PhaseSequence>,
    /// Guidance renderer used by the workflow monitor
    pub renderer: Arc<dyn ContentRenderer>,
    /// Dwell period before a tracked instruction is retried
    pub min_dwell: Duration,
    /// Delivery budget for tracked instructions
    pub max_retries: u32,
}

impl TaskOptions {
    /// Build options from a loaded configuration
    pub fn from_config(config: &Config, renderer: Arc<dyn ContentRenderer>) -> Result<Self> {
        Ok(Self {
            state_file: config.workflow.state_file.clone(),
            sequence: config.phase_sequence()?,
            renderer,
            min_dwell: config.retry.min_dwell,
            max_retries: config.retry.max_retries,
        })
    }
}

/// Subscribe the built-in tasks on `bus`
///
/// Returns the subscription ids in registration order. The workflow monitor
/// is only registered when a phase sequence is configured.
pub fn register_default_tasks(bus: &mut TaskManager, options: TaskOptions) -> Vec<SubscriptionId> {
    let mut ids = vec![bus.subscribe(RetryTask::new(options.min_dwell), EventType::TIMER)];

    match options.sequence {
        Some(sequence) => {
            let monitor = WorkflowMonitor::new(options.state_file, sequence);
            ids.push(bus.subscribe(
                WorkflowMonitorTask::new(monitor, options.renderer),
                EventType::FILE_CHANGED | EventType::CONSENT,
            ));
        }
        None => tracing::info!("Workflow disabled; not monitoring the state file"),
    }

    ids.push(bus.subscribe(
        CapabilityProbeTask::new(options.max_retries),
        EventType::FS_COMMAND,
    ));

    tracing::debug!(tasks = ?bus.task_names(), "Registered default tasks");
    ids
}
