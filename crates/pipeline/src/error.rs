//! Error types for the segmentation pipeline

use hippmapper_inference::InferenceError;
use hippmapper_tools::ToolError;
use hippmapper_volume::VolumeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model weights not found: {} (download the models and rerun)", .0.display())]
    MissingModel(PathBuf),

    #[error("Input not found: {0}")]
    MissingInput(String),

    #[error("Pattern {pattern} matches more than one input: {matches:?}")]
    AmbiguousInput {
        pattern: String,
        matches: Vec<PathBuf>,
    },

    #[error("No session matching *{session}* under {}", dir.display())]
    SessionNotFound { dir: PathBuf, session: String },

    #[error("Session *{session}* matches more than one directory: {matches:?}")]
    AmbiguousSession {
        session: String,
        matches: Vec<PathBuf>,
    },

    #[error("Subject is locked by another run: {} (remove it if no run is active)", .0.display())]
    SubjectLocked(PathBuf),

    #[error("{stage} produced an empty mask")]
    EmptySegmentation { stage: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Join(err.to_string())
    }
}

impl From<glob::GlobError> for PipelineError {
    fn from(err: glob::GlobError) -> Self {
        PipelineError::Io(err.into_error())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
