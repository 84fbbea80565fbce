//! Resample one image onto another's grid

use super::{ctrl_c_token, ConfigArgs};
use anyhow::{Context as _, Result};
use clap::Args;
use hippmapper_pipeline::Backend;
use hippmapper_tools::{C3dTool, CropTool, NativeTools};
use hippmapper_volume::Interpolation;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn parse_interpolation(value: &str) -> std::result::Result<Interpolation, String> {
    value
        .parse::<u8>()
        .ok()
        .and_then(Interpolation::from_order)
        .ok_or_else(|| format!("expected 0 (nearest), 1 (linear) or 3 (cubic), got {value}"))
}

#[derive(Args)]
pub struct TrimLikeCommand {
    /// Image to resample
    #[arg(short, long = "in", value_name = "NIFTI")]
    pub(crate) input: PathBuf,

    /// Image whose grid the result takes
    #[arg(short, long = "ref", value_name = "NIFTI")]
    pub(crate) reference: PathBuf,

    /// Output path
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) out: PathBuf,

    /// Interpolation order: 0, 1 or 3
    #[arg(long, default_value = "1", value_parser = parse_interpolation)]
    pub(crate) interp: Interpolation,

    #[command(flatten)]
    pub(crate) config: ConfigArgs,
}

impl TrimLikeCommand {
    pub async fn execute(self) -> Result<()> {
        let config = self.config.load()?;
        let tool: Arc<dyn CropTool> = match config.backend {
            Backend::Native => Arc::new(NativeTools),
            Backend::External => {
                Arc::new(C3dTool::new(config.tools.clone()).with_timeout(config.tool_timeout()))
            }
        };

        tool.reslice_like(
            &self.input,
            &self.reference,
            &self.out,
            self.interp,
            &ctrl_c_token(),
        )
        .await
        .with_context(|| format!("Failed to reslice {}", self.input.display()))?;

        info!("✓ {} written", self.out.display());
        Ok(())
    }
}
