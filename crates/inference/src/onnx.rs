//! ONNX Runtime backed segmentation networks
//!
//! Sessions are built with full graph optimization and CUDA ahead of the CPU
//! provider. `HIPPMAPPER_THREADS` overrides the intra-op thread count, which
//! otherwise defaults to the physical core count.

use crate::error::{InferenceError, Result};
use crate::model::TrainedModel;
use ndarray::{Array3, Array5};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use rand::RngCore;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

/// Environment variable overriding the session thread count
pub const THREADS_ENV: &str = "HIPPMAPPER_THREADS";

fn session_threads() -> usize {
    std::env::var(THREADS_ENV)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(num_cpus::get_physical)
}

fn builder_error(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::SessionBuilder(e.to_string())
}

/// Build an optimized session for `model_path`
pub fn create_session(model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        return Err(InferenceError::ModelNotFound(
            model_path.display().to_string(),
        ));
    }

    let threads = session_threads();
    let start = Instant::now();
    let session = Session::builder()
        .map_err(builder_error)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(builder_error)?
        .with_intra_threads(threads)
        .map_err(builder_error)?
        .with_memory_pattern(true)
        .map_err(builder_error)?
        .with_execution_providers([
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ])
        .map_err(builder_error)?
        .commit_from_file(model_path)
        .map_err(|e| InferenceError::ModelLoad {
            path: model_path.display().to_string(),
            error: e.to_string(),
        })?;

    debug!(
        "Session for {} ready in {:.3}s ({} threads)",
        model_path.display(),
        start.elapsed().as_secs_f64(),
        threads
    );
    Ok(session)
}

/// A network loaded from an `.onnx` file
///
/// Input is `[1, 1, X, Y, Z]`. Output may be `[1, 1, X, Y, Z]` or
/// `[1, X, Y, Z]` and must match the input's spatial shape. Dropout layers
/// exported in training mode sample inside the runtime, so passes over the
/// same input differ but are not controlled by the supplied generator.
pub struct OnnxModel {
    name: String,
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn load(model_path: &Path) -> Result<Self> {
        let session = create_session(model_path)?;
        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        info!("Loaded model {} from {}", name, model_path.display());
        Ok(Self {
            name,
            session: Mutex::new(session),
        })
    }
}

/// Spatial dimensions of a network output tensor
fn output_dims(shape: &[i64]) -> Result<[usize; 3]> {
    let spatial = match shape {
        [1, 1, x, y, z] | [1, x, y, z] => [*x, *y, *z],
        _ => return Err(InferenceError::InvalidOutputShape(shape.to_vec())),
    };
    if spatial.iter().any(|n| *n <= 0) {
        return Err(InferenceError::InvalidOutputShape(shape.to_vec()));
    }
    Ok(spatial.map(|n| n as usize))
}

impl TrainedModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &Array3<f32>, _rng: &mut dyn RngCore) -> Result<Array3<f32>> {
        let (x, y, z) = input.dim();
        let batch: Array5<f32> = input.to_shape((1, 1, x, y, z))?.into_owned();

        let mut session = self
            .session
            .lock()
            .map_err(|e| InferenceError::Session(e.to_string()))?;
        let tensor = TensorRef::from_array_view(batch.view())?;
        let outputs = session.run(ort::inputs![tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        let dims = output_dims(shape.as_ref())?;
        if dims != [x, y, z] {
            return Err(InferenceError::ShapeMismatch {
                expected: [x, y, z],
                actual: dims,
            });
        }
        Ok(Array3::from_shape_vec(dims, data.to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dims_accepts_both_layouts() {
        assert_eq!(output_dims(&[1, 1, 4, 5, 6]).unwrap(), [4, 5, 6]);
        assert_eq!(output_dims(&[1, 4, 5, 6]).unwrap(), [4, 5, 6]);
    }

    #[test]
    fn test_output_dims_rejects_other_layouts() {
        assert!(matches!(
            output_dims(&[2, 1, 4, 5, 6]),
            Err(InferenceError::InvalidOutputShape(_))
        ));
        assert!(output_dims(&[1, 2, 4, 5, 6]).is_err());
        assert!(output_dims(&[4, 5, 6]).is_err());
        assert!(output_dims(&[1, 1, 0, 5, 6]).is_err());
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxModel::load(&dir.path().join("absent.onnx"));
        assert!(matches!(result, Err(InferenceError::ModelNotFound(_))));
    }
}
