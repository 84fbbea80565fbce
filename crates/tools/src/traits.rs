//! Collaborator interfaces used by the segmentation pipeline
//!
//! Every operation reads its input from a file and writes its output to a
//! caller-chosen path. Callers pass a temporary path and rename it on
//! success, so implementations may leave partial output behind on failure.

use crate::error::Result;
use async_trait::async_trait;
use hippmapper_common::CancelToken;
use hippmapper_volume::{AxisCodes, Interpolation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// N4 bias field correction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasFieldParams {
    pub shrink_factor: u32,
    pub bspline_fitting_distance: f64,
    /// Iterations per fitting level
    pub iterations: Vec<u32>,
    pub convergence_threshold: f64,
    pub mask: Option<PathBuf>,
    /// ITK worker threads, defaults to 90% of the available CPUs
    pub threads: Option<usize>,
}

impl Default for BiasFieldParams {
    fn default() -> Self {
        Self {
            shrink_factor: 3,
            bspline_fitting_distance: 300.0,
            iterations: vec![50, 50, 30, 20],
            convergence_threshold: 1e-6,
            mask: None,
            threads: None,
        }
    }
}

impl BiasFieldParams {
    pub fn thread_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| ((num_cpus::get() as f64) * 0.9) as usize)
            .max(1)
    }
}

#[async_trait]
pub trait BiasFieldCorrector: Send + Sync {
    fn name(&self) -> &str;

    async fn correct(
        &self,
        input: &Path,
        output: &Path,
        params: &BiasFieldParams,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Zero voxels below `percent` of the robust intensity range of nonzero voxels
#[async_trait]
pub trait RobustThreshold: Send + Sync {
    fn name(&self) -> &str;

    async fn threshold(
        &self,
        input: &Path,
        output: &Path,
        percent: f32,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Masked local-window mean/variance normalization with a voxel `radius`
#[async_trait]
pub trait LocalContrastNormalizer: Send + Sync {
    fn name(&self) -> &str;

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        radius: [usize; 3],
        cancel: &CancelToken,
    ) -> Result<()>;
}

#[async_trait]
pub trait ReorientTool: Send + Sync {
    fn name(&self) -> &str;

    async fn reorient(
        &self,
        input: &Path,
        output: &Path,
        target: AxisCodes,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// What an orientation probe reports about an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbedOrientation {
    Aligned(AxisCodes),
    /// Not axis aligned; `closest` is the fallback code recovered from the
    /// probe's auxiliary output, if any
    Oblique {
        closest: Option<AxisCodes>,
        raw: String,
    },
}

#[async_trait]
pub trait OrientationProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self, input: &Path, cancel: &CancelToken) -> Result<ProbedOrientation>;
}

#[async_trait]
pub trait CropTool: Send + Sync {
    fn name(&self) -> &str;

    /// Crop to the nonzero bounding box grown by `margin` voxels
    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        margin: [usize; 3],
        cancel: &CancelToken,
    ) -> Result<()>;

    /// Resample `input` onto the grid of `reference` without registration
    async fn reslice_like(
        &self,
        input: &Path,
        reference: &Path,
        output: &Path,
        interpolation: Interpolation,
        cancel: &CancelToken,
    ) -> Result<()>;
}

/// Layout of a QC mosaic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicParams {
    /// Slice increment
    pub gap: usize,
    /// First slice shown, clamped to the volume
    pub min_slice: usize,
    /// Overlay opacity
    pub alpha: f32,
    /// Tile grid as `[rows, columns]`
    pub tile: [usize; 2],
    /// Slicing axis
    pub direction: usize,
    /// Flip each slice along its `[x, y]` axes
    pub flip: [bool; 2],
    /// Margin in voxels kept around the segmentation
    pub roi: usize,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            gap: 2,
            min_slice: 30,
            alpha: 0.5,
            tile: [4, 5],
            direction: 2,
            flip: [false, true],
            roi: 30,
        }
    }
}

impl MosaicParams {
    /// Settings used for the segmentation QC image of a finished run
    pub fn segmentation_qc() -> Self {
        Self {
            gap: 3,
            direction: 1,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait MosaicRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(
        &self,
        structural: &Path,
        overlay: Option<&Path>,
        output: &Path,
        params: &MosaicParams,
        cancel: &CancelToken,
    ) -> Result<()>;
}
