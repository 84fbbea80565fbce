//! Error types for model inference

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("ONNX Runtime error: {0}")]
    OrtError(#[from] ort::Error),

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to create session builder: {0}")]
    SessionBuilder(String),

    #[error("Failed to load model from {path}: {error}")]
    ModelLoad { path: String, error: String },

    #[error("Invalid model output shape: expected [1, 1, X, Y, Z] or [1, X, Y, Z], got {0:?}")]
    InvalidOutputShape(Vec<i64>),

    #[error("Model output shape {actual:?} does not match {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Model session unavailable: {0}")]
    Session(String),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type for inference operations
pub type Result<T> = std::result::Result<T, InferenceError>;
