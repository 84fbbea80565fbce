//! The model seam: anything that maps a volume to a probability map

use crate::error::Result;
use ndarray::Array3;
use rand::RngCore;

/// A trained segmentation network
///
/// `forward` takes a single-channel volume on the network's input grid and
/// returns a same-shaped foreground probability map. Implementations with
/// dropout active at inference time are stochastic; those that sample
/// in-process must draw all randomness from `rng` so passes are reproducible.
pub trait TrainedModel: Send + Sync {
    fn name(&self) -> &str;

    fn forward(&self, input: &Array3<f32>, rng: &mut dyn RngCore) -> Result<Array3<f32>>;
}
