//! Workflow state file
//!
//! The state file is written by the agent or by tooling; Waypoint only
//! reads it (apart from the `state set-phase` helper). It is YAML with
//! capitalised keys:
//!
//! ```yaml
//! Phase: planning
//! Issue: ABC-1
//! Description: Add retry support
//! Queue:
//!   - ABC-2
//! Tracking: https://example.invalid/ABC-1
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Immutable snapshot of the workflow state file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Current phase name
    #[serde(rename = "Phase")]
    pub phase: String,

    /// Issue being worked on
    #[serde(rename = "Issue", default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,

    /// Free-form description of the work
    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    /// Upcoming issues, in order
    #[serde(rename = "Queue", default, skip_serializing_if = "Vec::is_empty")]
    pub queue: Vec<String>,

    /// Tracking reference (ticket URL, branch, ...)
    #[serde(rename = "Tracking", default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<String>,
}

impl WorkflowState {
    /// Create a state at the given phase with every other field empty
    pub fn at_phase(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            ..Self::default()
        }
    }

    /// Parse state file content
    ///
    /// An empty document or a missing `Phase` is rejected so that a
    /// half-written file is never mistaken for a real state.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(Error::StateParse("state file is empty".to_string()));
        }

        let mut state: WorkflowState = serde_yaml::from_str(content)
            .map_err(|e| Error::StateParse(format!("malformed state file: {}", e)))?;

        state.phase = state.phase.trim().to_string();
        if state.phase.is_empty() {
            return Err(Error::StateParse("Phase must not be empty".to_string()));
        }
        state.issue = normalize(state.issue);
        state.description = normalize(state.description);
        state.tracking = normalize(state.tracking);

        Ok(state)
    }

    /// Serialize to state file content
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Load the state file, defaulting to `default_phase` when it does not exist
    pub fn load(path: &Path, default_phase: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::at_phase(default_phase))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write the state file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
