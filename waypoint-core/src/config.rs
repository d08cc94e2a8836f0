//! Configuration management for Waypoint
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (WAYPOINT_*)
//! 3. Config file (~/.config/waypoint/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::{resolve_phase_sequence, PhaseSequence, WorkflowFlag};
use crate::{Error, Result};

/// Workflow-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Phase flag: `true`, `false`, a list of names or a consent map
    pub phases: WorkflowFlag,

    /// Path of the workflow state file
    pub state_file: PathBuf,

    /// Directory holding phase guidance files
    pub guidance_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            phases: WorkflowFlag::default(),
            state_file: PathBuf::from(".waypoint/state.yaml"),
            guidance_dir: None,
        }
    }
}

/// Instruction retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How often the retry timer fires
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Minimum time between two deliveries of the same instruction
    #[serde(with = "humantime_serde")]
    pub min_dwell: Duration,

    /// Delivery budget for tracked instructions, the first send included
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_dwell: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// State file monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How often the state file is checked for changes
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Workflow configuration
    pub workflow: WorkflowConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Monitor configuration
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/waypoint/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("waypoint").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - WAYPOINT_STATE_FILE: Path of the workflow state file
    /// - WAYPOINT_PHASES: Workflow flag as JSON
    /// - WAYPOINT_GUIDANCE_DIR: Directory holding phase guidance
    /// - WAYPOINT_MAX_RETRIES: Delivery budget for tracked instructions
    ///
    /// A value that does not parse is an error, never skipped.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup("WAYPOINT_STATE_FILE") {
            self.workflow.state_file = PathBuf::from(path);
        }

        if let Some(phases) = lookup("WAYPOINT_PHASES") {
            self.workflow.phases = phases
                .parse()
                .map_err(|e| Error::Config(format!("Invalid WAYPOINT_PHASES: {}", e)))?;
        }

        if let Some(dir) = lookup("WAYPOINT_GUIDANCE_DIR") {
            self.workflow.guidance_dir = Some(PathBuf::from(dir));
        }

        if let Some(retries) = lookup("WAYPOINT_MAX_RETRIES") {
            self.retry.max_retries = retries.trim().parse().map_err(|e| {
                Error::Config(format!("Invalid WAYPOINT_MAX_RETRIES '{}': {}", retries, e))
            })?;
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        state_file: Option<PathBuf>,
        phases: Option<WorkflowFlag>,
    ) -> Self {
        if let Some(path) = state_file {
            self.workflow.state_file = path;
        }

        if let Some(flag) = phases {
            self.workflow.phases = flag;
        }

        self
    }

    /// Load configuration with all overrides applied, then validate it
    ///
    /// Priority: CLI > env > config file > defaults. An explicit
    /// `config_path` replaces the default file location and must exist.
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        state_file: Option<PathBuf>,
        phases: Option<WorkflowFlag>,
    ) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };
        let config = base
            .with_env_overrides()?
            .with_cli_overrides(state_file, phases);
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that cannot work
    pub fn validate(&self) -> Result<()> {
        self.phase_sequence()?;

        if self.retry.max_retries == 0 {
            return Err(Error::Config(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry.interval.is_zero() {
            return Err(Error::Config("retry.interval must not be zero".to_string()));
        }
        if self.monitor.poll_interval.is_zero() {
            return Err(Error::Config(
                "monitor.poll_interval must not be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured phase sequence
    ///
    /// `Ok(None)` means the workflow is disabled.
    pub fn phase_sequence(&self) -> Result<Option<PhaseSequence>> {
        resolve_phase_sequence(&self.workflow.phases)
            .map_err(|e| Error::Config(format!("Invalid workflow.phases: {}", e)))
    }
}
