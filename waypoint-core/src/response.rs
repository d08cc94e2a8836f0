//! Outbound response composition
//!
//! The only way instruction text leaves the engine: task results from a
//! dispatch are turned into messages, then the instruction FIFO is drained
//! behind them. Instructions are only drained when answering the agent;
//! unprompted output carries task messages alone, so queued instructions
//! keep the retry cycle waiting until the agent has actually received them.

use serde::Serialize;

use crate::bus::{DispatchOutcome, TaskManager, TaskResult};
use crate::guidance::ContentRenderer;
use crate::Result;

/// What is sent back to the agent after one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboundResponse {
    /// Task output, in subscription order
    pub messages: Vec<String>,
    /// Drained instructions, oldest first
    pub instructions: Vec<String>,
}

impl OutboundResponse {
    /// True when there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.instructions.is_empty()
    }
}

/// Build the response for a dispatch and drain pending instructions
///
/// `Render` results whose template is missing are skipped. A renderer
/// error aborts before anything is drained, so no instruction is lost.
pub async fn compose_response(
    outcome: DispatchOutcome,
    bus: &mut TaskManager,
    renderer: &dyn ContentRenderer,
) -> Result<OutboundResponse> {
    let mut response = compose_messages(outcome, renderer).await?;
    response.instructions = bus.drain_pending();
    Ok(response)
}

/// Build a response holding task messages only
///
/// Pending instructions stay queued for the next answer to the agent.
pub async fn compose_messages(
    outcome: DispatchOutcome,
    renderer: &dyn ContentRenderer,
) -> Result<OutboundResponse> {
    let mut messages = Vec::with_capacity(outcome.results.len());

    for outcome in outcome.results {
        match outcome.result {
            TaskResult::Message(text) => messages.push(text),
            TaskResult::Render { template, context } => {
                match renderer.render(&template, &context).await? {
                    Some(text) => messages.push(text),
                    None => tracing::debug!(
                        task = outcome.task,
                        %template,
                        "No content for template; skipping"
                    ),
                }
            }
        }
    }

    Ok(OutboundResponse {
        messages,
        instructions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TaskOutcome;
    use crate::guidance::{NullRenderer, StaticRenderer};
    use serde_json::json;

    fn outcome(results: Vec<TaskResult>) -> DispatchOutcome {
        DispatchOutcome {
            processed: results.len(),
            results: results
                .into_iter()
                .map(|result| TaskOutcome { task: "test", result })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_messages_then_instructions() {
        let mut bus = TaskManager::new();
        bus.queue_instruction("first");
        bus.queue_instruction("second");
        let renderer = StaticRenderer::new().with_entry("capabilities-ack", "Thanks.");

        let response = compose_response(
            outcome(vec![
                TaskResult::Message("hello".to_string()),
                TaskResult::Render {
                    template: "capabilities*".to_string(),
                    context: json!({}),
                },
            ]),
            &mut bus,
            &renderer,
        )
        .await
        .unwrap();

        assert_eq!(response.messages, vec!["hello", "Thanks."]);
        assert_eq!(response.instructions, vec!["first", "second"]);
        assert!(bus.drain_pending().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_skipped() {
        let mut bus = TaskManager::new();
        let response = compose_response(
            outcome(vec![TaskResult::Render {
                template: "nothing*".to_string(),
                context: json!({}),
            }]),
            &mut bus,
            &NullRenderer,
        )
        .await
        .unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_messages_only_keeps_instructions_queued() {
        let mut bus = TaskManager::new();
        bus.queue_instruction_with_ack("check X", 3);

        let response = compose_messages(
            outcome(vec![TaskResult::Message("tick".to_string())]),
            &NullRenderer,
        )
        .await
        .unwrap();
        assert_eq!(response.messages, vec!["tick"]);
        assert!(response.instructions.is_empty());
        assert_eq!(bus.instructions().pending_len(), 1);

        let response = compose_response(outcome(Vec::new()), &mut bus, &NullRenderer)
            .await
            .unwrap();
        assert_eq!(response.instructions, vec!["check X"]);
    }

    #[test]
    fn test_serializes_both_lists() {
        let response = OutboundResponse {
            messages: vec!["m".to_string()],
            instructions: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "messages": ["m"], "instructions": [] })
        );
    }
}
