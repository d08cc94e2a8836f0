//! Workflow state file commands

use clap::{Args, Subcommand};
use waypoint_core::workflow::START_PHASE;
use waypoint_core::{Config, WorkflowState};

/// Workflow state commands
#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Print the current workflow state
    Show,

    /// Set the workflow phase
    SetPhase {
        /// Phase to move to
        phase: String,
    },
}

impl StateArgs {
    /// Execute the state command
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let path = &config.workflow.state_file;
        let sequence = config.phase_sequence()?;
        let start = sequence
            .as_ref()
            .map(|s| s.start().name.as_str())
            .unwrap_or(START_PHASE);

        match &self.command {
            StateCommand::Show => {
                let state = WorkflowState::load(path, start)?;
                println!("State file: {}", path.display());
                if !path.exists() {
                    println!("  (not found - showing defaults)");
                }
                println!();
                print!("{}", state.to_yaml()?);
            }
            StateCommand::SetPhase { phase } => {
                let mut state = WorkflowState::load(path, start)?;
                if let Some(sequence) = &sequence {
                    if !sequence.contains(phase) {
                        anyhow::bail!(
                            "'{}' is not a phase of this workflow (phases: {})",
                            phase,
                            sequence.names().join(", ")
                        );
                    }
                    let permission = sequence.check_transition(Some(state.phase.as_str()), phase);
                    if let Some(reason) = permission.blocking_reason() {
                        println!("Note: {}", reason);
                    }
                }

                tracing::info!(from = %state.phase, to = %phase, "Updating workflow phase");
                state.phase = phase.clone();
                state.save(path)?;
                println!("Phase set to '{}' in {}", phase, path.display());
            }
        }
        Ok(())
    }
}
