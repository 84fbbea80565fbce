//! Per-subject segmentation: fifteen stages from a raw T1 to a labeled mask
//!
//! Each stage reads the artifacts of earlier stages from disk and publishes
//! exactly one artifact of its own through a `.partial-` path. A stage whose
//! artifact is fresh under the configured [`CachePolicy`] is not rerun, so an
//! interrupted run resumes from the first missing or stale artifact.
//!
//! [`CachePolicy`]: crate::config::CachePolicy

use crate::artifact::{commit, discard, partial_path, publish_volume};
use crate::cache::{StageCache, StageKey};
use crate::config::{Backend, PipelineConfig, RoiPolicy};
use crate::error::{PipelineError, Result};
use crate::lock::SubjectLock;
use crate::orientation::{OrientationNormalizer, OrientationOutcome};
use crate::stages::{Stage, StagePaths};
use crate::subject::{resolve, ResolvedSubject};
use hippmapper_common::{CancelToken, SubjectRef};
use hippmapper_inference::{EnsembleAggregator, OnnxModel, TrainedModel};
use hippmapper_tools::{
    AntsMosaic, BiasFieldCorrector, C3dTool, CropTool, FslThreshold, LocalContrastNormalizer,
    MosaicRenderer, N4Corrector, NativeMosaic, NativeTools, OrientationProbe, ReorientTool,
    RobustThreshold,
};
use hippmapper_volume::intensity::{binarize, local_window_radius, standardize};
use hippmapper_volume::nifti::{read_nifti, write_nifti};
use hippmapper_volume::region::{extract_region, nonzero_bbox, BoundingBox, Region};
use hippmapper_volume::{largest_two, resample, reslice_like, split_hemispheres, Interpolation};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// The collaborators a run delegates to
#[derive(Clone)]
pub struct Collaborators {
    pub bias: Arc<dyn BiasFieldCorrector>,
    pub threshold: Arc<dyn RobustThreshold>,
    pub contrast: Arc<dyn LocalContrastNormalizer>,
    pub reorient: Arc<dyn ReorientTool>,
    pub probe: Arc<dyn OrientationProbe>,
    pub crop: Arc<dyn CropTool>,
    pub mosaic: Arc<dyn MosaicRenderer>,
    pub coarse_model: Arc<dyn TrainedModel>,
    pub fine_model: Arc<dyn TrainedModel>,
}

impl Collaborators {
    /// Load both networks and pick tool implementations for the configured backend
    ///
    /// Fails with [`PipelineError::MissingModel`] before anything else runs
    /// when a weight file is absent.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let coarse_path = config.models.coarse_path();
        let fine_path = config.models.fine_path();
        for path in [&coarse_path, &fine_path] {
            if !path.is_file() {
                return Err(PipelineError::MissingModel(path.clone()));
            }
        }
        let coarse_model: Arc<dyn TrainedModel> = Arc::new(OnnxModel::load(&coarse_path)?);
        let fine_model: Arc<dyn TrainedModel> = Arc::new(OnnxModel::load(&fine_path)?);

        let timeout = config.tool_timeout();
        let bias: Arc<dyn BiasFieldCorrector> =
            Arc::new(N4Corrector::new(config.tools.clone()).with_timeout(timeout));

        let collaborators = match config.backend {
            Backend::Native => Self {
                bias,
                threshold: Arc::new(NativeTools),
                contrast: Arc::new(NativeTools),
                reorient: Arc::new(NativeTools),
                probe: Arc::new(NativeTools),
                crop: Arc::new(NativeTools),
                mosaic: Arc::new(NativeMosaic),
                coarse_model,
                fine_model,
            },
            Backend::External => {
                let c3d = Arc::new(C3dTool::new(config.tools.clone()).with_timeout(timeout));
                Self {
                    bias,
                    threshold: Arc::new(
                        FslThreshold::new(config.tools.clone()).with_timeout(timeout),
                    ),
                    contrast: c3d.clone(),
                    reorient: c3d.clone(),
                    probe: c3d.clone(),
                    crop: c3d,
                    mosaic: Arc::new(AntsMosaic::new(config.tools.clone()).with_timeout(timeout)),
                    coarse_model,
                    fine_model,
                }
            }
        };
        info!(
            "Using {:?} backend (threshold: {}, crop: {}, qc: {})",
            config.backend,
            collaborators.threshold.name(),
            collaborators.crop.name(),
            collaborators.mosaic.name()
        );
        Ok(collaborators)
    }
}

/// Per-run overrides of the configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run even if the final prediction already exists
    pub force: bool,
    /// Bias correct even when a corrected T1 was found
    pub bias: bool,
    pub ignore_orientation: bool,
    /// Write the labeled prediction here instead of the subject directory
    pub output: Option<PathBuf>,
    pub seed: Option<u64>,
    pub samples: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The prediction existed and the run was a no-op
    AlreadyDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Computed,
    Cached,
    NotRequired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub seconds: f64,
    pub artifact: Option<PathBuf>,
}

/// Result of one subject's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationReport {
    pub subject: String,
    pub prediction: PathBuf,
    pub status: RunStatus,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
    pub seconds: f64,
}

impl SegmentationReport {
    pub fn outcome_of(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.outcome)
    }
}

/// Run `f` on the blocking pool
async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn roi_region(policy: RoiPolicy, bbox: &BoundingBox) -> Region {
    match policy {
        RoiPolicy::FixedSize { size } => Region::centred(bbox, size),
        RoiPolicy::Margin { voxels } => Region::around(bbox, [voxels; 3]),
    }
}

/// Stage bookkeeping for one run
struct StageRun<'a> {
    cache: &'a StageCache,
    cancel: &'a CancelToken,
    records: Vec<StageRecord>,
}

impl<'a> StageRun<'a> {
    fn new(cache: &'a StageCache, cancel: &'a CancelToken) -> Self {
        Self {
            cache,
            cancel,
            records: Vec::with_capacity(Stage::COUNT),
        }
    }

    fn begin(&self, stage: Stage) -> Result<()> {
        info!("--- Stage {}/{}: {} ---", stage.number(), Stage::COUNT, stage);
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn push(
        &mut self,
        stage: Stage,
        outcome: StageOutcome,
        duration: Duration,
        artifact: Option<&Path>,
    ) {
        self.records.push(StageRecord {
            stage,
            outcome,
            seconds: duration.as_secs_f64(),
            artifact: artifact.map(Path::to_path_buf),
        });
    }

    fn skip(&mut self, stage: Stage, reason: &str) -> Result<()> {
        self.begin(stage)?;
        info!("  Not required: {}", reason);
        self.push(stage, StageOutcome::NotRequired, Duration::ZERO, None);
        Ok(())
    }

    /// Produce `artifact` with `work` unless it is fresh for `key`
    ///
    /// `work` receives the partial path to write. The partial file is
    /// renamed over `artifact` on success and removed on failure.
    async fn execute<F, Fut>(
        &mut self,
        stage: Stage,
        artifact: &Path,
        key: StageKey,
        work: F,
    ) -> Result<()>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.begin(stage)?;
        if self.cache.is_fresh(artifact, &key) {
            info!("  Cached: {}", artifact.display());
            self.push(stage, StageOutcome::Cached, Duration::ZERO, Some(artifact));
            return Ok(());
        }
        self.cache.invalidate(artifact);

        let partial = partial_path(artifact);
        let start = Instant::now();
        if let Err(e) = work(partial.clone()).await {
            error!("  {} failed: {}", stage, e);
            discard(&partial);
            return Err(e);
        }
        commit(&partial, artifact)?;
        self.cache.record(artifact, &key)?;

        let duration = start.elapsed();
        info!("  ✓ Completed in {:.2}s", duration.as_secs_f64());
        self.push(stage, StageOutcome::Computed, duration, Some(artifact));
        Ok(())
    }
}

pub struct Orchestrator {
    config: PipelineConfig,
    tools: Collaborators,
    cache: StageCache,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, tools: Collaborators) -> Result<Self> {
        config.validate()?;
        let cache = StageCache::new(config.cache);
        Ok(Self {
            config,
            tools,
            cache,
            cancel: CancelToken::new(),
        })
    }

    /// Build with the ONNX models and tool backend named in `config`
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let tools = Collaborators::from_config(&config)?;
        Self::new(config, tools)
    }

    /// Share a cancellation token; cancelling it stops the run at the next
    /// stage boundary and kills running external tools
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Segment one subject
    pub async fn run(
        &self,
        subject: &SubjectRef,
        options: &RunOptions,
    ) -> Result<SegmentationReport> {
        let start = Instant::now();
        let resolved = resolve(subject)?;
        let paths = StagePaths::new(&resolved, options.output.as_deref());

        if paths.prediction.exists() && !options.force {
            info!(
                "{} already segmented: {}",
                resolved.id,
                paths.prediction.display()
            );
            return Ok(SegmentationReport {
                subject: resolved.id,
                prediction: paths.prediction,
                status: RunStatus::AlreadyDone,
                stages: Vec::new(),
                warnings: Vec::new(),
                seconds: start.elapsed().as_secs_f64(),
            });
        }

        info!("=== Segmenting {} ===", resolved.id);
        info!("T1: {}", resolved.t1.display());
        std::fs::create_dir_all(&paths.pred_dir)?;
        let _lock = SubjectLock::acquire(&paths.pred_dir)?;

        let mut run = StageRun::new(&self.cache, &self.cancel);
        let mut warnings = Vec::new();
        self.run_stages(&resolved, &paths, options, &mut run, &mut warnings)
            .await?;

        let seconds = start.elapsed().as_secs_f64();
        info!("=== {} done in {:.2}s ===", resolved.id, seconds);
        info!("Prediction: {}", paths.prediction.display());
        Ok(SegmentationReport {
            subject: resolved.id,
            prediction: paths.prediction,
            status: RunStatus::Completed,
            stages: run.records,
            warnings,
            seconds,
        })
    }

    async fn run_stages(
        &self,
        subject: &ResolvedSubject,
        paths: &StagePaths,
        options: &RunOptions,
        run: &mut StageRun<'_>,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let config = &self.config;
        let tools = &self.tools;
        let cancel = &self.cancel;
        let cache = &self.cache;
        // Keys see the configured seed only, so an unseeded run resumes from
        // the ensemble it already drew
        let configured_seed = options.seed.or(config.seed);
        let seed = configured_seed.unwrap_or_else(rand::random::<u64>);
        if configured_seed.is_none() {
            info!("Unseeded run, drew seed {}", seed);
        }

        // 1
        let structural = if options.bias || subject.needs_bias {
            let input = &subject.t1;
            let params = (&config.bias, tools.bias.name());
            let key = cache.key(Stage::BiasCorrect, &params, &[input])?;
            run.execute(Stage::BiasCorrect, &paths.bias_corrected, key, |partial| async move {
                tools
                    .bias
                    .correct(input, &partial, &config.bias, cancel)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
            paths.bias_corrected.clone()
        } else {
            run.skip(Stage::BiasCorrect, "T1 is already bias corrected")?;
            subject.t1.clone()
        };

        // 2
        let structural = if options.ignore_orientation || config.ignore_orientation {
            run.skip(Stage::OrientationNormalize, "orientation check disabled")?;
            structural
        } else {
            run.begin(Stage::OrientationNormalize)?;
            let started = Instant::now();
            let normalizer =
                OrientationNormalizer::new(tools.probe.clone(), tools.reorient.clone());
            let outcome = normalizer
                .ensure_standard_orientation(&structural, &paths.oriented, cache, cancel)
                .await?;
            let stage_outcome = match &outcome {
                OrientationOutcome::Reoriented { .. } => StageOutcome::Computed,
                OrientationOutcome::SkippedExisting { .. } => StageOutcome::Cached,
                OrientationOutcome::AlreadyStandard(_) => StageOutcome::NotRequired,
                OrientationOutcome::Unresolved { reason } => {
                    warnings.push(format!("orientation unresolved: {}", reason));
                    StageOutcome::NotRequired
                }
            };
            let effective = outcome.effective_path(&structural).to_path_buf();
            run.push(
                Stage::OrientationNormalize,
                stage_outcome,
                started.elapsed(),
                outcome.was_reoriented().then_some(effective.as_path()),
            );
            effective
        };
        let structural = structural.as_path();

        // 3
        let percent = config.threshold_percent;
        let key = cache.key(
            Stage::IntensityThreshold,
            &(percent, tools.threshold.name()),
            &[structural],
        )?;
        run.execute(Stage::IntensityThreshold, &paths.thresholded, key, |partial| async move {
            tools
                .threshold
                .threshold(structural, &partial, percent, cancel)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        // 4
        let thresholded = paths.thresholded.as_path();
        let divisor = config.window_divisor;
        let key = cache.key(
            Stage::LocalContrast,
            &(divisor, tools.contrast.name()),
            &[thresholded],
        )?;
        run.execute(Stage::LocalContrast, &paths.standardized, key, |partial| async move {
            let input = thresholded.to_path_buf();
            let shape = tokio::task::spawn_blocking(move || read_nifti(&input).map(|v| v.shape()))
                .await??;
            let radius = local_window_radius(shape, divisor);
            info!("  Local window radius {:?}", radius);
            tools.contrast.normalize(thresholded, &partial, radius, cancel).await?;
            Ok::<(), PipelineError>(())
        })
        .await?;

        // 5
        let standardized = paths.standardized.as_path();
        let margin = [config.crop_margin; 3];
        let key = cache.key(Stage::Crop, &(margin, tools.crop.name()), &[standardized])?;
        run.execute(Stage::Crop, &paths.cropped, key, |partial| async move {
            tools
                .crop
                .trim(standardized, &partial, margin, cancel)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        // 6
        let coarse_shape = config.coarse_shape;
        let key = cache.key(Stage::CoarseResample, &coarse_shape, &[&paths.cropped])?;
        let input = paths.cropped.clone();
        run.execute(Stage::CoarseResample, &paths.coarse_resampled, key, |partial| {
            blocking(move || {
                let volume = read_nifti(&input)?;
                let resampled = resample(&volume, coarse_shape, Interpolation::Linear)?;
                write_nifti(&partial, &resampled)?;
                Ok(())
            })
        })
        .await?;

        // 7
        let cutoff = config.probability_threshold;
        let key = cache.key(
            Stage::CoarseInference,
            &(cutoff, tools.coarse_model.name()),
            &[&paths.coarse_resampled, structural],
        )?;
        let input = paths.coarse_resampled.clone();
        let reference = structural.to_path_buf();
        let model = tools.coarse_model.clone();
        run.execute(Stage::CoarseInference, &paths.coarse_mask_raw, key, |partial| {
            blocking(move || {
                let volume = read_nifti(&input)?;
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let probability = volume.with_data(model.forward(volume.data(), &mut rng)?)?;
                let native = read_nifti(&reference)?.grid();
                let resliced = reslice_like(&probability, &native, Interpolation::Linear)?;
                let mask = binarize(&resliced, cutoff);
                info!("  Coarse mask: {} voxels", mask.count_nonzero());
                write_nifti(&partial, &mask)?;
                Ok(())
            })
        })
        .await?;

        // 8
        let roi_policy = config.roi;
        let connectivity = config.connectivity;
        let key = cache.key(
            Stage::CoarsePostProcess,
            &(roi_policy, connectivity, tools.crop.name()),
            &[&paths.coarse_mask_raw, structural],
        )?;
        let raw = paths.coarse_mask_raw.clone();
        let coarse_mask = paths.coarse_mask.clone();
        let roi_mask = paths.roi_mask.clone();
        run.execute(Stage::CoarsePostProcess, &paths.roi, key, |partial| async move {
            let mask_out = roi_mask.clone();
            blocking(move || {
                let mask = largest_two(&read_nifti(&raw)?, connectivity);
                let bbox = nonzero_bbox(&mask).ok_or_else(|| PipelineError::EmptySegmentation {
                    stage: Stage::CoarsePostProcess.to_string(),
                })?;
                let region = roi_region(roi_policy, &bbox);
                info!(
                    "  Kept {} voxels, ROI start {:?} shape {:?}",
                    mask.count_nonzero(),
                    region.start,
                    region.shape
                );
                publish_volume(&coarse_mask, &mask)?;
                publish_volume(&mask_out, &extract_region(&mask, &region)?)?;
                Ok(())
            })
            .await?;
            tools
                .crop
                .reslice_like(structural, &roi_mask, &partial, Interpolation::Cubic, cancel)
                .await?;
            Ok::<(), PipelineError>(())
        })
        .await?;

        // 9
        let key = cache.key(Stage::FineNormalize, &(), &[&paths.roi])?;
        let input = paths.roi.clone();
        run.execute(Stage::FineNormalize, &paths.roi_standardized, key, |partial| {
            blocking(move || {
                write_nifti(&partial, &standardize(&read_nifti(&input)?))?;
                Ok(())
            })
        })
        .await?;

        // 10
        let fine_shape = config.fine_shape;
        let key = cache.key(Stage::FineResample, &fine_shape, &[&paths.roi_standardized])?;
        let input = paths.roi_standardized.clone();
        run.execute(Stage::FineResample, &paths.fine_resampled, key, |partial| {
            blocking(move || {
                let resampled = resample(&read_nifti(&input)?, fine_shape, Interpolation::Linear)?;
                write_nifti(&partial, &resampled)?;
                Ok(())
            })
        })
        .await?;

        // 11
        let mut ensemble = config.ensemble.clone();
        if let Some(samples) = options.samples {
            ensemble.samples = samples;
        }
        let aggregator = EnsembleAggregator::new(ensemble.clone())?;
        let ensemble_seed = seed.wrapping_add(1);
        let key = cache.key(
            Stage::EnsembleInference,
            &(&ensemble, tools.fine_model.name(), configured_seed),
            &[&paths.fine_resampled],
        )?;
        let input = paths.fine_resampled.clone();
        let uncertainty_path = paths.fine_uncertainty.clone();
        let model = tools.fine_model.clone();
        run.execute(Stage::EnsembleInference, &paths.fine_probability, key, |partial| {
            blocking(move || {
                let volume = read_nifti(&input)?;
                let mut rng = ChaCha8Rng::seed_from_u64(ensemble_seed);
                let prediction = aggregator.predict(model.as_ref(), volume.data(), &mut rng)?;
                info!("  Averaged {} passes", prediction.samples);
                if let Some(uncertainty) = prediction.uncertainty {
                    publish_volume(&uncertainty_path, &volume.with_data(uncertainty)?)?;
                }
                write_nifti(&partial, &volume.with_data(prediction.mean)?)?;
                Ok(())
            })
        })
        .await?;

        // 12
        let uncertainty_enabled = ensemble.uncertainty;
        let key = cache.key(
            Stage::ResampleBack,
            &(uncertainty_enabled, tools.crop.name()),
            &[&paths.fine_probability, &paths.roi, structural],
        )?;
        let fine_probability = paths.fine_probability.clone();
        let roi = paths.roi.clone();
        let roi_probability = paths.roi_probability.clone();
        let fine_uncertainty = paths.fine_uncertainty.clone();
        let uncertainty = paths.uncertainty.clone();
        let reference = structural.to_path_buf();
        run.execute(Stage::ResampleBack, &paths.probability, key, |partial| async move {
            let roi_out = roi_probability.clone();
            blocking(move || {
                let roi_grid = read_nifti(&roi)?.grid();
                let fine = read_nifti(&fine_probability)?;
                let back = reslice_like(&fine, &roi_grid, Interpolation::Linear)?;
                publish_volume(&roi_out, &back)?;
                if uncertainty_enabled && fine_uncertainty.exists() {
                    let native = read_nifti(&reference)?.grid();
                    let spread = read_nifti(&fine_uncertainty)?;
                    let map = reslice_like(&spread, &native, Interpolation::Linear)?;
                    publish_volume(&uncertainty, &map)?;
                }
                Ok(())
            })
            .await?;
            tools
                .crop
                .reslice_like(
                    &roi_probability,
                    structural,
                    &partial,
                    Interpolation::Linear,
                    cancel,
                )
                .await?;
            Ok::<(), PipelineError>(())
        })
        .await?;

        // 13
        let key = cache.key(
            Stage::FinalThreshold,
            &(cutoff, connectivity),
            &[&paths.probability],
        )?;
        let input = paths.probability.clone();
        run.execute(Stage::FinalThreshold, &paths.binary, key, |partial| {
            blocking(move || {
                let mask = largest_two(&binarize(&read_nifti(&input)?, cutoff), connectivity);
                if mask.count_nonzero() == 0 {
                    return Err(PipelineError::EmptySegmentation {
                        stage: Stage::FinalThreshold.to_string(),
                    });
                }
                info!("  Final mask: {} voxels", mask.count_nonzero());
                write_nifti(&partial, &mask)?;
                Ok(())
            })
        })
        .await?;

        // 14
        if let Some(parent) = paths.prediction.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = cache.key(Stage::HemisphereSplit, &(), &[&paths.binary])?;
        let input = paths.binary.clone();
        run.execute(Stage::HemisphereSplit, &paths.prediction, key, |partial| {
            blocking(move || {
                let labeled = split_hemispheres(&read_nifti(&input)?)?;
                write_nifti(&partial, &labeled)?;
                Ok(())
            })
        })
        .await?;

        // 15
        if config.qc.enabled {
            std::fs::create_dir_all(&paths.qc_dir)?;
            let prediction = paths.prediction.as_path();
            let params = &config.qc.mosaic;
            let key = cache.key(
                Stage::QualityControl,
                &(params, tools.mosaic.name()),
                &[structural, prediction],
            )?;
            run.execute(Stage::QualityControl, &paths.qc, key, |partial| async move {
                tools
                    .mosaic
                    .render(structural, Some(prediction), &partial, params, cancel)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        } else {
            run.skip(Stage::QualityControl, "QC disabled")?;
        }

        if !warnings.is_empty() {
            for warning in warnings.iter() {
                warn!("{}: {}", subject.id, warning);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_region_policies() {
        let bbox = BoundingBox {
            start: [10, 20, 30],
            end: [20, 30, 34],
        };
        let fixed = roi_region(RoiPolicy::FixedSize { size: [8, 8, 8] }, &bbox);
        assert_eq!(fixed.start, [11, 21, 28]);
        assert_eq!(fixed.shape, [8, 8, 8]);

        let margin = roi_region(RoiPolicy::Margin { voxels: 2 }, &bbox);
        assert_eq!(margin.start, [8, 18, 28]);
        assert_eq!(margin.shape, [14, 14, 8]);
    }

    #[test]
    fn test_missing_models_fail_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.models.dir = dir.path().to_path_buf();
        match Orchestrator::from_config(config) {
            Err(PipelineError::MissingModel(path)) => {
                assert_eq!(path, dir.path().join("hipp_model.onnx"))
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("models should be missing"),
        }
    }
}
