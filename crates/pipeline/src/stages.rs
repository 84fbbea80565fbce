//! The fifteen per-subject stages and where each writes its artifact

use crate::subject::ResolvedSubject;
use hippmapper_volume::nifti::file_stem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BiasCorrect,
    OrientationNormalize,
    IntensityThreshold,
    LocalContrast,
    Crop,
    CoarseResample,
    CoarseInference,
    CoarsePostProcess,
    FineNormalize,
    FineResample,
    EnsembleInference,
    ResampleBack,
    FinalThreshold,
    HemisphereSplit,
    QualityControl,
}

impl Stage {
    pub const ALL: [Stage; 15] = [
        Stage::BiasCorrect,
        Stage::OrientationNormalize,
        Stage::IntensityThreshold,
        Stage::LocalContrast,
        Stage::Crop,
        Stage::CoarseResample,
        Stage::CoarseInference,
        Stage::CoarsePostProcess,
        Stage::FineNormalize,
        Stage::FineResample,
        Stage::EnsembleInference,
        Stage::ResampleBack,
        Stage::FinalThreshold,
        Stage::HemisphereSplit,
        Stage::QualityControl,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// 1-based position in the run
    pub fn number(self) -> usize {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .map_or(0, |i| i + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::BiasCorrect => "bias_correct",
            Stage::OrientationNormalize => "orientation_normalize",
            Stage::IntensityThreshold => "intensity_threshold",
            Stage::LocalContrast => "local_contrast",
            Stage::Crop => "crop",
            Stage::CoarseResample => "coarse_resample",
            Stage::CoarseInference => "coarse_inference",
            Stage::CoarsePostProcess => "coarse_post_process",
            Stage::FineNormalize => "fine_normalize",
            Stage::FineResample => "fine_resample",
            Stage::EnsembleInference => "ensemble_inference",
            Stage::ResampleBack => "resample_back",
            Stage::FinalThreshold => "final_threshold",
            Stage::HemisphereSplit => "hemisphere_split",
            Stage::QualityControl => "quality_control",
        }
    }

    /// Bumped when a stage's computation changes, invalidating cached artifacts
    pub fn version(self) -> u32 {
        1
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Artifact locations for one subject
///
/// Intermediates live in `<subject_dir>/pred_process`. Bias-corrected and
/// reoriented T1s, the binary and labeled predictions and the uncertainty
/// map sit in the subject directory, the mosaic in `<subject_dir>/qc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePaths {
    pub pred_dir: PathBuf,
    pub qc_dir: PathBuf,
    pub bias_corrected: PathBuf,
    pub oriented: PathBuf,
    pub thresholded: PathBuf,
    pub standardized: PathBuf,
    pub cropped: PathBuf,
    pub coarse_resampled: PathBuf,
    pub coarse_mask_raw: PathBuf,
    pub coarse_mask: PathBuf,
    pub roi_mask: PathBuf,
    pub roi: PathBuf,
    pub roi_standardized: PathBuf,
    pub fine_resampled: PathBuf,
    pub fine_probability: PathBuf,
    pub fine_uncertainty: PathBuf,
    pub roi_probability: PathBuf,
    pub probability: PathBuf,
    pub uncertainty: PathBuf,
    pub binary: PathBuf,
    pub prediction: PathBuf,
    pub qc: PathBuf,
}

impl StagePaths {
    pub fn new(subject: &ResolvedSubject, output: Option<&Path>) -> Self {
        let dir = &subject.dir;
        let pred_dir = dir.join("pred_process");
        let qc_dir = dir.join("qc");
        let stem = file_stem(&subject.t1);
        let id = &subject.id;
        let pred = subject.mode.prediction_name();
        let in_pred = |name: String| pred_dir.join(name);

        Self {
            bias_corrected: dir.join(format!("{}_nu.nii.gz", stem)),
            oriented: dir.join(format!("{}_std_orient.nii.gz", stem)),
            thresholded: in_pred(format!("{}_thresholded.nii.gz", stem)),
            standardized: in_pred(format!("{}_thresholded_standardized.nii.gz", stem)),
            cropped: in_pred(format!("{}_thresholded_standardized_cropped.nii.gz", stem)),
            coarse_resampled: in_pred(format!("{}_thresholded_resampled.nii.gz", stem)),
            coarse_mask_raw: in_pred(format!("{}_hipp_init_mask.nii.gz", id)),
            coarse_mask: in_pred(format!("{}_hipp_init_pred.nii.gz", id)),
            roi_mask: in_pred(format!("{}_hipp_init_pred_trimmed.nii.gz", id)),
            roi: in_pred(format!("{}_hipp_region.nii.gz", id)),
            roi_standardized: in_pred(format!("{}_trimmed_standardized.nii.gz", stem)),
            fine_resampled: in_pred(format!("{}_trimmed_resampled.nii.gz", stem)),
            fine_probability: in_pred(format!("{}_hipp_pred_mean.nii.gz", id)),
            fine_uncertainty: in_pred(format!("{}_hipp_pred_entropy.nii.gz", id)),
            roi_probability: in_pred(format!("{}_trimmed_hipp_pred_prob.nii.gz", id)),
            probability: in_pred(format!("{}_{}_prob.nii.gz", id, pred)),
            uncertainty: dir.join(format!("{}_{}_uncertainty.nii.gz", id, pred)),
            binary: dir.join(format!("{}_{}_bin.nii.gz", id, pred)),
            prediction: output
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.join(format!("{}_{}.nii.gz", id, pred))),
            qc: qc_dir.join(format!("{}_hipp_seg_qc.png", id)),
            pred_dir,
            qc_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::SubjectMode;

    fn subject(mode: SubjectMode) -> ResolvedSubject {
        ResolvedSubject {
            id: "sub01".to_string(),
            dir: PathBuf::from("/data/sub01"),
            t1: PathBuf::from("/data/sub01/sub01_T1.nii.gz"),
            needs_bias: true,
            mode,
        }
    }

    #[test]
    fn test_stage_numbering() {
        assert_eq!(Stage::COUNT, 15);
        assert_eq!(Stage::BiasCorrect.number(), 1);
        assert_eq!(Stage::QualityControl.number(), 15);
        assert_eq!(Stage::EnsembleInference.to_string(), "ensemble_inference");
    }

    #[test]
    fn test_subject_artifact_names() {
        let paths = StagePaths::new(&subject(SubjectMode::Directory), None);
        assert_eq!(paths.bias_corrected, PathBuf::from("/data/sub01/sub01_T1_nu.nii.gz"));
        assert_eq!(paths.oriented, PathBuf::from("/data/sub01/sub01_T1_std_orient.nii.gz"));
        assert_eq!(
            paths.thresholded,
            PathBuf::from("/data/sub01/pred_process/sub01_T1_thresholded.nii.gz")
        );
        assert_eq!(
            paths.prediction,
            PathBuf::from("/data/sub01/sub01_T1acq_hipp_pred.nii.gz")
        );
        assert_eq!(
            paths.probability,
            PathBuf::from("/data/sub01/pred_process/sub01_T1acq_hipp_pred_prob.nii.gz")
        );
        assert_eq!(paths.qc, PathBuf::from("/data/sub01/qc/sub01_hipp_seg_qc.png"));
    }

    #[test]
    fn test_direct_file_and_output_override() {
        let paths = StagePaths::new(&subject(SubjectMode::DirectFile), None);
        assert_eq!(paths.prediction, PathBuf::from("/data/sub01/sub01_hipp_pred.nii.gz"));

        let custom = Path::new("/out/seg.nii.gz");
        let paths = StagePaths::new(&subject(SubjectMode::Directory), Some(custom));
        assert_eq!(paths.prediction, custom);
        assert_eq!(paths.binary, PathBuf::from("/data/sub01/sub01_T1acq_hipp_pred_bin.nii.gz"));
    }
}
