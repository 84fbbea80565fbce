//! Pipeline configuration
//!
//! Every setting has a default, so a YAML file only needs the keys it
//! changes. Command-line flags are applied on top by the caller.

use crate::error::{PipelineError, Result};
use hippmapper_inference::EnsembleConfig;
use hippmapper_tools::{BiasFieldParams, MosaicParams, ToolPaths, DEFAULT_TOOL_TIMEOUT};
use hippmapper_volume::Connectivity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which implementation runs the volume-level collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process implementations
    #[default]
    Native,
    /// c3d and FSL executables
    External,
}

/// How the fine-stage region of interest is cut around the coarse mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoiPolicy {
    /// A box of exactly `size` voxels centred on the mask
    FixedSize { size: [usize; 3] },
    /// The mask's bounding box grown by `voxels` on every side
    Margin { voxels: usize },
}

impl Default for RoiPolicy {
    fn default() -> Self {
        RoiPolicy::FixedSize {
            size: [112, 112, 64],
        }
    }
}

/// When a stage artifact on disk counts as up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// The artifact exists and its key sidecar matches the stage inputs
    #[default]
    ContentAddressed,
    /// The artifact exists
    Existence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: PathBuf,
    pub coarse: String,
    pub fine: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            coarse: "hipp_model.onnx".to_string(),
            fine: "hipp_zoom_full_mcdp_model.onnx".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn coarse_path(&self) -> PathBuf {
        self.dir.join(&self.coarse)
    }

    pub fn fine_path(&self) -> PathBuf {
        self.dir.join(&self.fine)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    pub enabled: bool,
    pub mosaic: MosaicParams,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mosaic: MosaicParams::segmentation_qc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub models: ModelConfig,
    pub tools: ToolPaths,
    pub backend: Backend,
    /// Grid the coarse network runs on
    pub coarse_shape: [usize; 3],
    /// Grid the fine network runs on
    pub fine_shape: [usize; 3],
    /// Robust-range percentile below which intensities are zeroed
    pub threshold_percent: f32,
    /// Voxels kept around the head when cropping
    pub crop_margin: usize,
    pub roi: RoiPolicy,
    /// Cutoff applied to both probability maps
    pub probability_threshold: f32,
    /// Local normalization radius is each dimension divided by this
    pub window_divisor: f64,
    pub connectivity: Connectivity,
    pub ensemble: EnsembleConfig,
    /// Seed for the ensemble; unseeded runs draw from OS entropy
    pub seed: Option<u64>,
    pub cache: CachePolicy,
    pub tool_timeout_secs: u64,
    pub bias: BiasFieldParams,
    pub qc: QcConfig,
    pub ignore_orientation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models: ModelConfig::default(),
            tools: ToolPaths::default(),
            backend: Backend::default(),
            coarse_shape: [160, 160, 128],
            fine_shape: [112, 112, 64],
            threshold_percent: 10.0,
            crop_margin: 1,
            roi: RoiPolicy::default(),
            probability_threshold: 0.5,
            window_divisor: 2.2,
            connectivity: Connectivity::Vertex26,
            ensemble: EnsembleConfig::default(),
            seed: None,
            cache: CachePolicy::default(),
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT.as_secs(),
            bias: BiasFieldParams::default(),
            qc: QcConfig::default(),
            ignore_orientation: false,
        }
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::Config(message.into())
}

impl PipelineConfig {
    /// Load from a YAML file and validate
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.ensemble.samples = samples;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, shape) in [
            ("coarse_shape", self.coarse_shape),
            ("fine_shape", self.fine_shape),
        ] {
            if shape.iter().any(|n| *n == 0) {
                return Err(invalid(format!("{} {:?} has a zero dimension", name, shape)));
            }
        }
        if let RoiPolicy::FixedSize { size } = self.roi {
            if size.iter().any(|n| *n == 0) {
                return Err(invalid(format!("roi size {:?} has a zero dimension", size)));
            }
        }
        self.ensemble
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        if !(self.probability_threshold > 0.0 && self.probability_threshold < 1.0) {
            return Err(invalid(format!(
                "probability_threshold {} must be in (0, 1)",
                self.probability_threshold
            )));
        }
        if !(0.0..100.0).contains(&self.threshold_percent) {
            return Err(invalid(format!(
                "threshold_percent {} must be in [0, 100)",
                self.threshold_percent
            )));
        }
        if !(self.window_divisor > 0.0 && self.window_divisor.is_finite()) {
            return Err(invalid("window_divisor must be positive"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(invalid("tool_timeout_secs must be positive"));
        }
        if self.qc.mosaic.gap == 0 || self.qc.mosaic.direction > 2 {
            return Err(invalid("qc mosaic needs a positive gap and a direction in 0..=2"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.coarse_shape, [160, 160, 128]);
        assert_eq!(config.ensemble.samples, 30);
        assert_eq!(
            config.models.fine_path(),
            PathBuf::from("models/hipp_zoom_full_mcdp_model.onnx")
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = PipelineConfig::from_yaml_str(
            "backend: external\n\
             seed: 7\n\
             roi:\n  kind: margin\n  voxels: 10\n\
             ensemble:\n  samples: 5\n\
             tools:\n  c3d_bin: /opt/c3d/bin\n",
        )
        .unwrap();
        assert_eq!(config.backend, Backend::External);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.roi, RoiPolicy::Margin { voxels: 10 });
        assert_eq!(config.ensemble.samples, 5);
        assert!(config.ensemble.parallel);
        assert_eq!(config.tools.c3d(), PathBuf::from("/opt/c3d/bin/c3d"));
        assert_eq!(config.fine_shape, [112, 112, 64]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PipelineConfig::default().with_seed(3).with_samples(4);
        let back = PipelineConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_sample_config_parses() {
        let config =
            PipelineConfig::from_yaml_str(include_str!("../../../config/hippmapper.yaml")).unwrap();
        assert_eq!(config.backend, Backend::Native);
        assert_eq!(config.roi, RoiPolicy::default());
        assert!(config.ensemble.uncertainty);
        assert_eq!(config.tool_timeout(), Duration::from_secs(3600));
        assert_eq!(config.qc.mosaic, MosaicParams::segmentation_qc());
        assert_eq!(config.bias, BiasFieldParams::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "coarse_shape: [0, 160, 128]\n",
            "probability_threshold: 1.0\n",
            "threshold_percent: 100\n",
            "ensemble:\n  samples: 0\n",
            "roi:\n  kind: fixed_size\n  size: [112, 0, 64]\n",
            "tool_timeout_secs: 0\n",
        ];
        for case in cases {
            assert!(
                matches!(PipelineConfig::from_yaml_str(case), Err(PipelineError::Config(_))),
                "accepted {case:?}"
            );
        }
    }
}
