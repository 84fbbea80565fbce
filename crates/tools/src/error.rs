//! Error types for collaborator tools

use hippmapper_volume::VolumeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {}s", after.as_secs_f64())]
    Timeout { tool: String, after: Duration },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {tool} output: {detail}")]
    Parse { tool: String, detail: String },

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for ToolError {
    fn from(err: tokio::task::JoinError) -> Self {
        ToolError::Join(err.to_string())
    }
}

/// Result type for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;
