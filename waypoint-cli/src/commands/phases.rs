//! Phase sequence commands

use clap::Args;
use waypoint_core::workflow::ConsentQuery;
use waypoint_core::{Config, PhaseSequence, TransitionPermission};

/// Arguments for the phases command
#[derive(Args, Debug)]
pub struct PhasesArgs {
    /// Answer a consent query such as `review=true` instead of listing
    #[arg(short, long)]
    pub query: Option<ConsentQuery>,
}

impl PhasesArgs {
    /// Execute the phases command
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let Some(sequence) = config.phase_sequence()? else {
            println!("Workflow disabled");
            return Ok(());
        };

        if let Some(query) = &self.query {
            println!("{}", sequence.satisfies(query));
            return Ok(());
        }

        print_sequence(&sequence);
        Ok(())
    }
}

fn print_sequence(sequence: &PhaseSequence) {
    println!("Workflow: {}", sequence);
    println!();
    for (i, phase) in sequence.phases().iter().enumerate() {
        let markers = phase.markers().map(|m| format!(" [{}]", m)).unwrap_or_default();
        let consent = if sequence.has_consent(&phase.name) {
            " (consent granted)"
        } else {
            ""
        };
        println!("  {}. {}{}{}", i + 1, phase.name, markers, consent);
    }
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Phase being left
    pub from: String,

    /// Phase being entered
    pub to: String,
}

impl CheckArgs {
    /// Execute the check command
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let Some(sequence) = config.phase_sequence()? else {
            println!("Workflow disabled: every transition is allowed");
            return Ok(());
        };

        match sequence.check_transition(Some(self.from.as_str()), &self.to) {
            TransitionPermission::Allowed => {
                println!("Allowed: {} -> {}", self.from, self.to);
            }
            TransitionPermission::Blocked {
                reason, suggestion, ..
            } => {
                println!("Blocked: {} -> {}", self.from, self.to);
                println!("  Reason: {}", reason);
                println!("  Suggestion: {}", suggestion);
            }
        }
        Ok(())
    }
}
