//! In-process collaborators built on the volume crate
//!
//! Each operation loads its input, transforms it on the blocking pool and
//! writes the result. Cancellation is checked before the work starts; an
//! operation already running completes.

use crate::error::{Result, ToolError};
use crate::traits::{
    CropTool, LocalContrastNormalizer, OrientationProbe, ProbedOrientation, ReorientTool,
    RobustThreshold,
};
use async_trait::async_trait;
use hippmapper_common::CancelToken;
use hippmapper_volume::intensity::{local_window_normalize, robust_range_threshold};
use hippmapper_volume::nifti::{read_nifti, write_nifti};
use hippmapper_volume::{region, AxisCodes, Interpolation, Volume};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Obliquity in degrees above which a grid is reported as oblique
pub const OBLIQUE_TOLERANCE_DEGREES: f64 = 1e-3;

fn ensure_active(tool: &str, cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled {
            tool: tool.to_string(),
        });
    }
    Ok(())
}

/// Read `input`, apply `op` and write the result to `output` off the async runtime
async fn transform<F>(input: &Path, output: &Path, op: F) -> Result<()>
where
    F: FnOnce(Volume) -> Result<Volume> + Send + 'static,
{
    let input: PathBuf = input.to_path_buf();
    let output: PathBuf = output.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let volume = read_nifti(&input)?;
        let result = op(volume)?;
        write_nifti(&output, &result)?;
        Ok(())
    })
    .await?
}

/// Native implementations of the volume-level collaborators
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTools;

#[async_trait]
impl RobustThreshold for NativeTools {
    fn name(&self) -> &str {
        "native threshold"
    }

    async fn threshold(
        &self,
        input: &Path,
        output: &Path,
        percent: f32,
        cancel: &CancelToken,
    ) -> Result<()> {
        ensure_active(RobustThreshold::name(self), cancel)?;
        transform(input, output, move |volume| {
            Ok(robust_range_threshold(&volume, percent))
        })
        .await
    }
}

#[async_trait]
impl LocalContrastNormalizer for NativeTools {
    fn name(&self) -> &str {
        "native local window normalization"
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        radius: [usize; 3],
        cancel: &CancelToken,
    ) -> Result<()> {
        ensure_active(LocalContrastNormalizer::name(self), cancel)?;
        transform(input, output, move |volume| {
            Ok(local_window_normalize(&volume, radius))
        })
        .await
    }
}

#[async_trait]
impl ReorientTool for NativeTools {
    fn name(&self) -> &str {
        "native reorient"
    }

    async fn reorient(
        &self,
        input: &Path,
        output: &Path,
        target: AxisCodes,
        cancel: &CancelToken,
    ) -> Result<()> {
        ensure_active(ReorientTool::name(self), cancel)?;
        transform(input, output, move |volume| {
            debug!("Reorienting {} -> {}", volume.axis_codes(), target);
            Ok(volume.reorient(target)?)
        })
        .await
    }
}

#[async_trait]
impl OrientationProbe for NativeTools {
    fn name(&self) -> &str {
        "native orientation probe"
    }

    async fn probe(&self, input: &Path, cancel: &CancelToken) -> Result<ProbedOrientation> {
        ensure_active(OrientationProbe::name(self), cancel)?;
        let input = input.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let volume = read_nifti(&input)?;
            let codes = AxisCodes::from_affine(volume.affine())?;
            let obliquity = AxisCodes::obliquity(volume.affine())?;
            if obliquity > OBLIQUE_TOLERANCE_DEGREES {
                Ok(ProbedOrientation::Oblique {
                    closest: Some(codes),
                    raw: format!("oblique by {:.3} degrees, closest to {}", obliquity, codes),
                })
            } else {
                Ok(ProbedOrientation::Aligned(codes))
            }
        })
        .await?
    }
}

#[async_trait]
impl CropTool for NativeTools {
    fn name(&self) -> &str {
        "native crop"
    }

    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        margin: [usize; 3],
        cancel: &CancelToken,
    ) -> Result<()> {
        ensure_active(CropTool::name(self), cancel)?;
        transform(input, output, move |volume| {
            Ok(region::trim(&volume, margin)?)
        })
        .await
    }

    async fn reslice_like(
        &self,
        input: &Path,
        reference: &Path,
        output: &Path,
        interpolation: Interpolation,
        cancel: &CancelToken,
    ) -> Result<()> {
        ensure_active(CropTool::name(self), cancel)?;
        let reference = reference.to_path_buf();
        transform(input, output, move |volume| {
            let grid = read_nifti(&reference)?.grid();
            Ok(hippmapper_volume::reslice_like(&volume, &grid, interpolation)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippmapper_volume::Affine;
    use ndarray::Array3;

    fn write(dir: &Path, name: &str, volume: &Volume) -> PathBuf {
        let path = dir.join(name);
        write_nifti(&path, volume).unwrap();
        path
    }

    fn blob() -> Volume {
        let mut data = Array3::zeros((12, 10, 8));
        for i in 4..7 {
            for j in 3..6 {
                data[[i, j, 4]] = (10 * i + j) as f32;
            }
        }
        Volume::new(data, Affine::from_spacing([1.0, 1.5, 2.0], [-5.0, 3.0, 1.0])).unwrap()
    }

    #[tokio::test]
    async fn test_trim_then_reslice_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(dir.path(), "blob.nii.gz", &blob());
        let trimmed = dir.path().join("trimmed.nii.gz");
        let back = dir.path().join("back.nii.gz");
        let cancel = CancelToken::new();

        NativeTools.trim(&source, &trimmed, [1, 1, 1], &cancel).await.unwrap();
        assert_eq!(read_nifti(&trimmed).unwrap().shape(), [5, 5, 3]);

        NativeTools
            .reslice_like(&trimmed, &source, &back, Interpolation::Nearest, &cancel)
            .await
            .unwrap();
        assert_eq!(read_nifti(&back).unwrap().data(), blob().data());
    }

    #[tokio::test]
    async fn test_reorient_and_probe() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(dir.path(), "ras.nii.gz", &blob());
        let las = dir.path().join("las.nii.gz");
        let cancel = CancelToken::new();

        assert_eq!(
            NativeTools.probe(&source, &cancel).await.unwrap(),
            ProbedOrientation::Aligned(AxisCodes::RAS)
        );
        NativeTools
            .reorient(&source, &las, AxisCodes::LAS, &cancel)
            .await
            .unwrap();
        assert_eq!(
            NativeTools.probe(&las, &cancel).await.unwrap(),
            ProbedOrientation::Aligned(AxisCodes::LAS)
        );
    }

    #[tokio::test]
    async fn test_probe_reports_oblique_grid() {
        let dir = tempfile::tempdir().unwrap();
        let angle = 10f64.to_radians();
        let affine = Affine::from_columns(
            [
                [angle.cos(), angle.sin(), 0.0],
                [-angle.sin(), angle.cos(), 0.0],
                [0.0, 0.0, 1.0],
            ],
            [0.0; 3],
        );
        let volume = Volume::new(Array3::zeros((4, 4, 4)), affine).unwrap();
        let path = write(dir.path(), "oblique.nii.gz", &volume);

        match NativeTools.probe(&path, &CancelToken::new()).await.unwrap() {
            ProbedOrientation::Oblique { closest, .. } => {
                assert_eq!(closest, Some(AxisCodes::RAS));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = write(dir.path(), "blob.nii.gz", &blob());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = NativeTools
            .threshold(&source, &dir.path().join("out.nii.gz"), 10.0, &cancel)
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled { .. })));
        assert!(!dir.path().join("out.nii.gz").exists());
    }
}
