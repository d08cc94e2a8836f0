//! Workflow monitor task
//!
//! Feeds state file changes and consent signals into the
//! [`WorkflowMonitor`] and queues the resulting notices for the agent in
//! batch order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{Event, EventData, Task, TaskContext, TaskResult};
use crate::guidance::ContentRenderer;
use crate::workflow::{WorkflowMonitor, WorkflowNotice};
use crate::Result;

/// Task wrapping the workflow monitor
pub struct WorkflowMonitorTask {
    monitor: WorkflowMonitor,
    renderer: Arc<dyn ContentRenderer>,
}

impl WorkflowMonitorTask {
    /// Create the task
    pub fn new(monitor: WorkflowMonitor, renderer: Arc<dyn ContentRenderer>) -> Self {
        Self { monitor, renderer }
    }

    /// The wrapped monitor
    pub fn monitor(&self) -> &WorkflowMonitor {
        &self.monitor
    }

    fn deliver(notices: &[WorkflowNotice], ctx: &mut TaskContext<'_>) -> Option<TaskResult> {
        if notices.is_empty() {
            return None;
        }
        for notice in notices {
            ctx.queue_instruction(notice.instruction.clone());
        }
        let summary = notices
            .iter()
            .map(|n| n.event.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Some(TaskResult::Message(format!("Workflow updated: {}", summary)))
    }
}

#[async_trait]
impl Task for WorkflowMonitorTask {
    fn name(&self) -> &'static str {
        "workflow-monitor"
    }

    async fn handle_event(
        &mut self,
        event: &Event,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Option<TaskResult>> {
        match &event.data {
            EventData::FileChanged { path } => {
                let notices = self
                    .monitor
                    .on_file_changed(path, self.renderer.as_ref())
                    .await?;
                Ok(Self::deliver(&notices, ctx))
            }
            EventData::Consent { phase } => {
                let notice = self
                    .monitor
                    .on_consent(phase.as_deref(), self.renderer.as_ref())
                    .await?;
                Ok(notice.and_then(|n| Self::deliver(std::slice::from_ref(&n), ctx)))
            }
            _ => Ok(None),
        }
    }
}
