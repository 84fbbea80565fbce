//! Error types for volume geometry and voxel operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Degenerate affine: determinant {0:e} is not invertible")]
    DegenerateAffine(f64),

    #[error("Voxel spacing must be strictly positive, got {0:?}")]
    InvalidSpacing([f64; 3]),

    #[error("Invalid grid shape {0:?}: every axis needs at least one voxel")]
    InvalidShape([usize; 3]),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Invalid axis codes: {0}")]
    InvalidAxisCodes(String),

    #[error("No left/right axis in orientation {0}; hemisphere split is undefined")]
    NoLateralAxis(String),

    #[error("Unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),

    #[error("Invalid NIfTI file {path}: {reason}")]
    InvalidNifti { path: String, reason: String },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;
