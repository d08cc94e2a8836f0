//! Client capability probe
//!
//! Asks the agent once, at startup, to report what its client supports. The
//! question is tracked, so it is repeated with escalating urgency until the
//! answer arrives as a `client_capabilities` command.

use async_trait::async_trait;
use serde_json::json;

use crate::bus::{Event, EventData, InstructionId, Task, TaskContext, TaskResult};
use crate::Result;

/// Command name carrying the capability report
pub const CAPABILITIES_COMMAND: &str = "client_capabilities";

/// Template rendered once the report arrives
pub const CAPABILITIES_TEMPLATE: &str = "capabilities*";

const PROBE_TEXT: &str =
    "Report the capabilities of your client by sending the `client_capabilities` command.";

/// One-shot task probing the client for its capabilities
#[derive(Debug)]
pub struct CapabilityProbeTask {
    max_retries: u32,
    probe: Option<InstructionId>,
    capabilities: Option<serde_json::Value>,
}

impl CapabilityProbeTask {
    /// Create the probe with the given delivery budget
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            probe: None,
            capabilities: None,
        }
    }

    /// The capability report, once received
    pub fn capabilities(&self) -> Option<&serde_json::Value> {
        self.capabilities.as_ref()
    }
}

#[async_trait]
impl Task for CapabilityProbeTask {
    fn name(&self) -> &'static str {
        "capability-probe"
    }

    async fn on_init(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        let id = ctx.queue_instruction_with_ack(PROBE_TEXT, self.max_retries);
        tracing::debug!(%id, "Queued client capability probe");
        self.probe = Some(id);
        Ok(())
    }

    async fn handle_event(
        &mut self,
        event: &Event,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Option<TaskResult>> {
        let EventData::Command { name, payload } = &event.data else {
            return Ok(None);
        };
        if name != CAPABILITIES_COMMAND {
            return Ok(None);
        }

        // The probe may already have been dropped after its last retry.
        if let Some(id) = self.probe.take() {
            ctx.acknowledge_instruction(&id);
        }
        tracing::info!(capabilities = %payload, "Client capabilities received");
        self.capabilities = Some(payload.clone());
        ctx.unsubscribe_self();

        Ok(Some(TaskResult::Render {
            template: CAPABILITIES_TEMPLATE.to_string(),
            context: json!({ "capabilities": payload }),
        }))
    }
}
