//! Error types for Waypoint

use thiserror::Error;

/// Result type alias for Waypoint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Waypoint operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid workflow flag, phase sequence or consent query
    #[error("Validation error: {0}")]
    Validation(String),

    /// Workflow state file could not be parsed
    #[error("Invalid workflow state: {0}")]
    StateParse(String),

    /// Content rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// Event bus misuse (dispatch before init, after shutdown)
    #[error("Event bus error: {0}")]
    Bus(String),

    /// A background task failed while handling an event
    #[error("Task '{task}' failed: {message}")]
    Task { task: String, message: String },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
