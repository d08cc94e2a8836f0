//! Serve command - run the engine over stdin/stdout
//!
//! Reads one JSON message per line from stdin and writes one JSON response
//! per line to stdout. The retry timer and the state file poll feed the bus
//! from the same loop, so the bus only ever has one owner. Queued
//! instructions go out only in answer to an inbound message.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use waypoint_core::bus::{DispatchOutcome, EventData, EventType};
use waypoint_core::workflow::StateFileWatcher;
use waypoint_core::{
    compose_messages, compose_response, register_default_tasks, Config, ContentRenderer,
    DirectoryRenderer, OutboundResponse, StaticRenderer, TaskManager, TaskOptions,
};

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Directory holding phase guidance files (overrides config)
    #[arg(short, long)]
    pub guidance_dir: Option<PathBuf>,
}

/// A message from the agent side
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    /// A filesystem command issued by the agent
    Command {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// The user approved a phase transition
    Consent {
        #[serde(default)]
        phase: Option<String>,
    },
}

impl InboundMessage {
    fn into_event(self) -> (EventType, EventData) {
        match self {
            InboundMessage::Command { name, payload } => {
                (EventType::FS_COMMAND, EventData::Command { name, payload })
            }
            InboundMessage::Consent { phase } => (EventType::CONSENT, EventData::Consent { phase }),
        }
    }
}

impl ServeArgs {
    /// Execute the serve command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let guidance_dir = self
            .guidance_dir
            .clone()
            .or_else(|| config.workflow.guidance_dir.clone());
        let renderer: Arc<dyn ContentRenderer> = match guidance_dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Using guidance directory");
                Arc::new(DirectoryRenderer::new(dir))
            }
            None => Arc::new(StaticRenderer::with_default_phase_guidance()),
        };

        let options = TaskOptions::from_config(config, renderer.clone())?;
        let workflow_enabled = options.sequence.is_some();

        let mut bus = TaskManager::new();
        register_default_tasks(&mut bus, options);
        bus.init().await?;

        let mut stdout = tokio::io::stdout();
        let mut watcher = StateFileWatcher::new(&config.workflow.state_file);
        let mut retry_timer = tokio::time::interval(config.retry.interval);
        // The first tick completes immediately
        retry_timer.tick().await;
        let mut poll_timer = tokio::time::interval(config.monitor.poll_interval);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        tracing::info!(
            tasks = ?bus.task_names(),
            state_file = %config.workflow.state_file.display(),
            "Waypoint serving"
        );

        loop {
            let (kind, data, inbound) = tokio::select! {
                tick = retry_timer.tick() => {
                    (EventType::TIMER, EventData::Timer { now: tick.into_std() }, false)
                }
                _ = poll_timer.tick(), if workflow_enabled => {
                    match watcher.poll().await {
                        Ok(true) => (
                            EventType::FILE_CHANGED,
                            EventData::FileChanged { path: watcher.path().to_path_buf() },
                            false,
                        ),
                        Ok(false) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to poll workflow state file");
                            continue;
                        }
                    }
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) => match parse_line(&line) {
                            Some(message) => {
                                let (kind, data) = message.into_event();
                                (kind, data, true)
                            }
                            None => continue,
                        },
                        None => {
                            tracing::info!("Input closed; shutting down");
                            break;
                        }
                    }
                }
                _ = &mut ctrl_c => {
                    tracing::info!("Interrupted; shutting down");
                    break;
                }
            };

            let outcome = bus.dispatch(kind, data).await?;
            match respond(outcome, &mut bus, renderer.as_ref(), inbound).await {
                Ok(response) if response.is_empty() => {}
                Ok(response) => write_response(&mut stdout, &response).await?,
                Err(e) => tracing::warn!(error = %e, "Failed to compose response"),
            }
        }

        bus.shutdown();
        Ok(())
    }
}

/// Compose the response to a dispatch
///
/// Only an answer to an inbound message drains the instruction queue.
async fn respond(
    outcome: DispatchOutcome,
    bus: &mut TaskManager,
    renderer: &dyn ContentRenderer,
    inbound: bool,
) -> waypoint_core::Result<OutboundResponse> {
    if inbound {
        compose_response(outcome, bus, renderer).await
    } else {
        compose_messages(outcome, renderer).await
    }
}

fn parse_line(line: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed input line");
            None
        }
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &OutboundResponse,
) -> anyhow::Result<()> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    stdout.write_all(json.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let message =
            parse_line(r#"{"type":"command","name":"client_capabilities","payload":{"a":1}}"#)
                .unwrap();
        let (kind, data) = message.into_event();
        assert_eq!(kind, EventType::FS_COMMAND);
        assert!(matches!(data, EventData::Command { name, .. } if name == "client_capabilities"));
    }

    #[test]
    fn test_parse_consent_line() {
        let (kind, data) = parse_line(r#"{"type":"consent"}"#).unwrap().into_event();
        assert_eq!(kind, EventType::CONSENT);
        assert!(matches!(data, EventData::Consent { phase: None }));

        let (_, data) = parse_line(r#"{"type":"consent","phase":"review"}"#)
            .unwrap()
            .into_event();
        assert!(matches!(data, EventData::Consent { phase: Some(p) } if p == "review"));
    }

    #[tokio::test]
    async fn test_instructions_wait_for_inbound_message() {
        use std::time::{Duration, Instant};
        use waypoint_core::tasks::RetryTask;
        use waypoint_core::NullRenderer;

        let mut bus = TaskManager::new();
        bus.subscribe(RetryTask::new(Duration::from_secs(30)), EventType::TIMER);
        bus.init().await.unwrap();
        let start = Instant::now();
        let id = bus.queue_instruction_with_ack("check X", 3);

        let outcome = bus
            .dispatch(
                EventType::TIMER,
                EventData::Timer {
                    now: start + Duration::from_secs(60),
                },
            )
            .await
            .unwrap();
        let response = respond(outcome, &mut bus, &NullRenderer, false).await.unwrap();
        assert!(response.is_empty());
        assert_eq!(bus.instructions().tracked(&id).unwrap().retry_count, 0);

        let outcome = bus
            .dispatch(
                EventType::FS_COMMAND,
                EventData::Command {
                    name: "noop".to_string(),
                    payload: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        let response = respond(outcome, &mut bus, &NullRenderer, true).await.unwrap();
        assert_eq!(response.instructions, vec!["check X"]);
    }

    #[test]
    fn test_malformed_lines_ignored() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not json").is_none());
        assert!(parse_line(r#"{"type":"unknown"}"#).is_none());
    }
}
