//! Collaborators backed by the c3d, ANTs and FSL executables
//!
//! c3d reports and accepts orientation codes in the ITK "from" convention,
//! so codes are converted at this boundary with [`AxisCodes::to_itk`] and
//! [`AxisCodes::from_itk`].

use crate::command::{ToolCommand, DEFAULT_TOOL_TIMEOUT};
use crate::error::{Result, ToolError};
use crate::paths::ToolPaths;
use crate::traits::{
    BiasFieldCorrector, BiasFieldParams, CropTool, LocalContrastNormalizer, MosaicParams,
    MosaicRenderer, OrientationProbe, ProbedOrientation, ReorientTool, RobustThreshold,
};
use async_trait::async_trait;
use hippmapper_common::CancelToken;
use hippmapper_volume::{AxisCodes, Interpolation};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

fn format_iterations(iterations: &[u32]) -> String {
    iterations
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

fn format_voxels(size: [usize; 3], suffix: &str) -> String {
    format!("{}x{}x{}{}", size[0], size[1], size[2], suffix)
}

/// `N4BiasFieldCorrection` from ANTs
pub struct N4Corrector {
    paths: ToolPaths,
    timeout: Duration,
}

impl N4Corrector {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self, input: &Path, output: &Path, params: &BiasFieldParams) -> ToolCommand {
        let mut command = ToolCommand::new(
            "N4BiasFieldCorrection",
            self.paths.ants("N4BiasFieldCorrection"),
        )
        .args(["-d", "3", "-i"])
        .arg(input)
        .arg("-s")
        .arg(params.shrink_factor.to_string())
        .arg("-b")
        .arg(format!("[ {} ]", params.bspline_fitting_distance))
        .arg("-c")
        .arg(format!(
            "[ {}, {:e} ]",
            format_iterations(&params.iterations),
            params.convergence_threshold
        ))
        .arg("-o")
        .arg(output)
        .env(
            "ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS",
            params.thread_count().to_string(),
        );
        if let Some(mask) = &params.mask {
            command = command.arg("--mask-image").arg(mask);
        }
        command
    }
}

#[async_trait]
impl BiasFieldCorrector for N4Corrector {
    fn name(&self) -> &str {
        "N4BiasFieldCorrection"
    }

    async fn correct(
        &self,
        input: &Path,
        output: &Path,
        params: &BiasFieldParams,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!("Bias field correcting {}", input.display());
        self.command(input, output, params)
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }
}

/// `fslmaths -thrP`
pub struct FslThreshold {
    paths: ToolPaths,
    timeout: Duration,
}

impl FslThreshold {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self, input: &Path, output: &Path, percent: f32) -> ToolCommand {
        let mut command = ToolCommand::new("fslmaths", self.paths.fslmaths())
            .arg(input)
            .arg("-thrP")
            .arg(percent.to_string())
            .arg(output)
            .env("FSLOUTPUTTYPE", "NIFTI_GZ");
        if let Some(dir) = self.paths.fsl_dir() {
            command = command.env("FSLDIR", dir);
        }
        command
    }
}

#[async_trait]
impl RobustThreshold for FslThreshold {
    fn name(&self) -> &str {
        "fslmaths"
    }

    async fn threshold(
        &self,
        input: &Path,
        output: &Path,
        percent: f32,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.command(input, output, percent)
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }
}

/// Convert3D for local normalization, orientation and cropping
pub struct C3dTool {
    paths: ToolPaths,
    timeout: Duration,
}

impl C3dTool {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn base(&self) -> ToolCommand {
        ToolCommand::new("c3d", self.paths.c3d())
    }

    pub fn normalize_command(
        &self,
        input: &Path,
        output: &Path,
        radius: [usize; 3],
    ) -> ToolCommand {
        self.base()
            .arg(input)
            .args(["-binarize", "-as", "m"])
            .arg(input)
            .args(["-push", "m", "-nlw"])
            .arg(format_voxels(radius, ""))
            .args(["-push", "m", "-times", "-replace", "nan", "0", "-o"])
            .arg(output)
    }

    pub fn reorient_command(&self, input: &Path, output: &Path, target: AxisCodes) -> ToolCommand {
        self.base()
            .arg(input)
            .arg("-orient")
            .arg(target.to_itk())
            .arg("-o")
            .arg(output)
    }

    pub fn trim_command(&self, input: &Path, output: &Path, margin: [usize; 3]) -> ToolCommand {
        self.base()
            .arg(input)
            .arg("-trim")
            .arg(format_voxels(margin, "vox"))
            .arg("-o")
            .arg(output)
    }

    pub fn reslice_command(
        &self,
        input: &Path,
        reference: &Path,
        output: &Path,
        interpolation: Interpolation,
    ) -> ToolCommand {
        self.base()
            .arg(reference)
            .arg("-int")
            .arg(interpolation.order().to_string())
            .arg(input)
            .arg("-reslice-identity")
            .arg("-o")
            .arg(output)
    }
}

/// Orientation from `c3d -info` output
///
/// Aligned images print `orient = RAI`. Oblique ones print `orient = Oblique`
/// followed by a `closest to XXX` hint on some builds; without the hint the
/// last three-letter code in the output is tried. Codes are converted from
/// ITK to the "towards" convention.
pub fn parse_c3d_orientation(output: &str) -> Result<ProbedOrientation> {
    let start = output.find("orient =").ok_or_else(|| ToolError::Parse {
        tool: "c3d".to_string(),
        detail: "no 'orient =' field in -info output".to_string(),
    })? + "orient =".len();
    let field: String = output[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    if let Some(codes) = itk_code(&field) {
        return Ok(ProbedOrientation::Aligned(codes));
    }
    if !field.starts_with("Obl") {
        return Err(ToolError::Parse {
            tool: "c3d".to_string(),
            detail: format!("unrecognised orientation '{}'", field),
        });
    }

    let closest = closest_hint(&output[start..]).or_else(|| trailing_code(&output[start..]));
    Ok(ProbedOrientation::Oblique {
        closest,
        raw: output.trim().to_string(),
    })
}

/// A well-formed three-letter ITK code, converted to the "towards" convention
fn itk_code(token: &str) -> Option<AxisCodes> {
    let token = token.trim_matches(|c: char| !c.is_ascii_alphabetic());
    if token.len() != 3 {
        return None;
    }
    AxisCodes::from_itk(token)
        .ok()
        .filter(AxisCodes::is_well_formed)
}

fn closest_hint(text: &str) -> Option<AxisCodes> {
    let index = text.find("closest to")?;
    text[index + "closest to".len()..]
        .split_whitespace()
        .next()
        .and_then(itk_code)
}

fn trailing_code(text: &str) -> Option<AxisCodes> {
    text.split_whitespace().rev().find_map(itk_code)
}

#[async_trait]
impl LocalContrastNormalizer for C3dTool {
    fn name(&self) -> &str {
        "c3d -nlw"
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        radius: [usize; 3],
        cancel: &CancelToken,
    ) -> Result<()> {
        self.normalize_command(input, output, radius)
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReorientTool for C3dTool {
    fn name(&self) -> &str {
        "c3d -orient"
    }

    async fn reorient(
        &self,
        input: &Path,
        output: &Path,
        target: AxisCodes,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.reorient_command(input, output, target)
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrientationProbe for C3dTool {
    fn name(&self) -> &str {
        "c3d -info"
    }

    async fn probe(&self, input: &Path, cancel: &CancelToken) -> Result<ProbedOrientation> {
        let output = self
            .base()
            .arg(input)
            .arg("-info")
            .run(self.timeout, cancel)
            .await?;
        debug!("c3d -info: {}", output.stdout.trim());
        parse_c3d_orientation(&output.stdout)
    }
}

#[async_trait]
impl CropTool for C3dTool {
    fn name(&self) -> &str {
        "c3d"
    }

    async fn trim(
        &self,
        input: &Path,
        output: &Path,
        margin: [usize; 3],
        cancel: &CancelToken,
    ) -> Result<()> {
        self.trim_command(input, output, margin)
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }

    async fn reslice_like(
        &self,
        input: &Path,
        reference: &Path,
        output: &Path,
        interpolation: Interpolation,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.reslice_command(input, reference, output, interpolation)
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }
}

/// Mosaic rendering with c3d and the ANTs `CreateTiledMosaic` tool
pub struct AntsMosaic {
    paths: ToolPaths,
    timeout: Duration,
}

impl AntsMosaic {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Last slice index used for a slice increment
    fn max_slice(gap: usize) -> usize {
        match gap {
            1 => 100,
            2 => 220,
            5 => 275,
            _ => 300,
        }
    }
}

#[async_trait]
impl MosaicRenderer for AntsMosaic {
    fn name(&self) -> &str {
        "CreateTiledMosaic"
    }

    async fn render(
        &self,
        structural: &Path,
        overlay: Option<&Path>,
        output: &Path,
        params: &MosaicParams,
        cancel: &CancelToken,
    ) -> Result<()> {
        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        let scratch = tempfile::Builder::new()
            .prefix(".mosaic-")
            .tempdir_in(parent)?;
        let c3d = || ToolCommand::new("c3d", self.paths.c3d());
        let struct_trim = scratch.path().join("struct_trim.nii.gz");

        let mut mosaic =
            ToolCommand::new("CreateTiledMosaic", self.paths.ants("CreateTiledMosaic"));
        if let Some(overlay) = overlay {
            let seg_trim = scratch.path().join("seg_trim.nii.gz");
            let rgb = scratch.path().join("seg_rgb.nii.gz");
            c3d()
                .arg(overlay)
                .arg("-trim")
                .arg(format_voxels([params.roi; 3], "vox"))
                .arg("-o")
                .arg(&seg_trim)
                .run(self.timeout, cancel)
                .await?;
            c3d()
                .arg(&seg_trim)
                .arg(structural)
                .arg("-reslice-identity")
                .arg("-o")
                .arg(&struct_trim)
                .run(self.timeout, cancel)
                .await?;
            ToolCommand::new(
                "ConvertScalarImageToRGB",
                self.paths.ants("ConvertScalarImageToRGB"),
            )
            .arg("3")
            .arg(&seg_trim)
            .arg(&rgb)
            .args(["none", "jet", "none", "0", "10", "0", "255"])
            .run(self.timeout, cancel)
            .await?;
            mosaic = mosaic
                .arg("-r")
                .arg(&rgb)
                .arg("-x")
                .arg(&seg_trim)
                .arg("-a")
                .arg(params.alpha.to_string());
        } else {
            tokio::fs::copy(structural, &struct_trim).await?;
        }

        c3d()
            .arg(&struct_trim)
            .args(["-stretch", "2%", "98%", "0", "255", "-clip", "0", "255", "-o"])
            .arg(&struct_trim)
            .run(self.timeout, cancel)
            .await?;

        mosaic
            .arg("-i")
            .arg(&struct_trim)
            .arg("-o")
            .arg(output)
            .arg("-d")
            .arg(params.direction.to_string())
            .arg("-t")
            .arg(format!("{}x{}", params.tile[0], params.tile[1]))
            .arg("-s")
            .arg(format!(
                "[{},{},{}]",
                params.gap,
                params.min_slice,
                Self::max_slice(params.gap)
            ))
            .arg("-f")
            .arg(format!("{}x{}", params.flip[0] as u8, params.flip[1] as u8))
            .run(self.timeout, cancel)
            .await?;
        Ok(())
    }
}
