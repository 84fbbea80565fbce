//! Monte Carlo dropout ensembles
//!
//! A stochastic network is run `samples` times over the same input and the
//! probability maps are averaged voxelwise. Each pass gets its own
//! `ChaCha8Rng` seeded from the caller's generator before any pass runs, so
//! the result depends only on that generator, not on scheduling. Passes may
//! run concurrently but are always summed in draw order.

use crate::error::{InferenceError, Result};
use crate::model::TrainedModel;
use hippmapper_volume::intensity::binary_entropy_value;
use ndarray::Array3;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Default number of stochastic passes
pub const DEFAULT_SAMPLES: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Number of forward passes, at least 1
    pub samples: usize,
    /// Run passes on the rayon pool
    pub parallel: bool,
    /// Also compute a per-voxel binary entropy map of the mean
    pub uncertainty: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            parallel: true,
            uncertainty: false,
        }
    }
}

impl EnsembleConfig {
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_uncertainty(mut self, uncertainty: bool) -> Self {
        self.uncertainty = uncertainty;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(InferenceError::InvalidConfig(
                "ensemble sample count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Averaged output of an ensemble run
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    /// Voxelwise mean probability, same shape as the input
    pub mean: Array3<f32>,
    /// Binary entropy of `mean` in nats, when requested
    pub uncertainty: Option<Array3<f32>>,
    /// Number of passes averaged
    pub samples: usize,
}

pub struct EnsembleAggregator {
    config: EnsembleConfig,
}

impl EnsembleAggregator {
    pub fn new(config: EnsembleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn predict(
        &self,
        model: &dyn TrainedModel,
        input: &Array3<f32>,
        rng: &mut dyn RngCore,
    ) -> Result<EnsemblePrediction> {
        let samples = self.config.samples;
        let seeds: Vec<u64> = (0..samples).map(|_| rng.next_u64()).collect();
        let start = Instant::now();

        let run = |seed: &u64| {
            let mut sample_rng = ChaCha8Rng::seed_from_u64(*seed);
            model.forward(input, &mut sample_rng)
        };
        let outputs: Vec<Result<Array3<f32>>> = if self.config.parallel && samples > 1 {
            seeds.par_iter().map(run).collect()
        } else {
            seeds.iter().map(run).collect()
        };

        let expected = dims(input);
        let mut sum = Array3::<f64>::zeros(input.dim());
        for output in outputs {
            let output = output?;
            let actual = dims(&output);
            if actual != expected {
                return Err(InferenceError::ShapeMismatch { expected, actual });
            }
            sum.zip_mut_with(&output, |acc, v| *acc += *v as f64);
        }
        let mean = sum.mapv(|v| (v / samples as f64) as f32);
        let uncertainty = self
            .config
            .uncertainty
            .then(|| mean.mapv(binary_entropy_value));

        info!(
            "{}: averaged {} passes in {:.2}s",
            model.name(),
            samples,
            start.elapsed().as_secs_f64()
        );
        debug!(
            "Mean probability range [{:.4}, {:.4}]",
            mean.iter().copied().fold(f32::INFINITY, f32::min),
            mean.iter().copied().fold(f32::NEG_INFINITY, f32::max)
        );

        Ok(EnsemblePrediction {
            mean,
            uncertainty,
            samples,
        })
    }
}

fn dims(data: &Array3<f32>) -> [usize; 3] {
    let (x, y, z) = data.dim();
    [x, y, z]
}

/// Mean of `n_samples` passes with the default parallel schedule
pub fn predict_ensemble(
    model: &dyn TrainedModel,
    input: &Array3<f32>,
    n_samples: usize,
    rng: &mut dyn RngCore,
) -> Result<Array3<f32>> {
    let aggregator = EnsembleAggregator::new(EnsembleConfig::default().with_samples(n_samples))?;
    Ok(aggregator.predict(model, input, rng)?.mean)
}
