//! Segmentation network inference
//!
//! [`TrainedModel`] is the seam between the pipeline and a network backend.
//! [`OnnxModel`] runs exported networks through ONNX Runtime, and
//! [`EnsembleAggregator`] averages repeated passes of a stochastic network.
//!
//! ```no_run
//! use hippmapper_inference::{EnsembleAggregator, EnsembleConfig, OnnxModel};
//! use ndarray::Array3;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use std::path::Path;
//!
//! let model = OnnxModel::load(Path::new("models/hipp_zoom_full_mcdp_model.onnx"))?;
//! let aggregator = EnsembleAggregator::new(EnsembleConfig::default())?;
//! let input = Array3::<f32>::zeros((112, 112, 64));
//! let prediction = aggregator.predict(&model, &input, &mut ChaCha8Rng::seed_from_u64(7))?;
//! println!("{} passes", prediction.samples);
//! # Ok::<(), hippmapper_inference::InferenceError>(())
//! ```

pub mod ensemble;
pub mod error;
pub mod model;
pub mod onnx;

pub use ensemble::{predict_ensemble, EnsembleAggregator, EnsembleConfig, EnsemblePrediction};
pub use error::{InferenceError, Result};
pub use model::TrainedModel;
pub use onnx::{create_session, OnnxModel};
