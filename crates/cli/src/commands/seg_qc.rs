//! QC mosaic of a segmentation

use super::{ctrl_c_token, ConfigArgs};
use anyhow::{Context as _, Result};
use clap::Args;
use hippmapper_pipeline::Backend;
use hippmapper_tools::{AntsMosaic, MosaicParams, MosaicRenderer, NativeMosaic};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args)]
pub struct SegQcCommand {
    /// Structural image
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) t1: PathBuf,

    /// Segmentation drawn over the structural image
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) seg: PathBuf,

    /// Output PNG, defaults to `<seg dir>/qc/<seg stem>_qc.png`
    #[arg(short, long, value_name = "PNG")]
    pub(crate) out: Option<PathBuf>,

    /// Slice increment
    #[arg(long, default_value = "3")]
    pub(crate) gap: usize,

    /// Slicing axis
    #[arg(long, default_value = "1")]
    pub(crate) direction: usize,

    /// Overlay opacity
    #[arg(long, default_value = "0.5")]
    pub(crate) alpha: f32,

    #[command(flatten)]
    pub(crate) config: ConfigArgs,
}

impl SegQcCommand {
    fn output(&self) -> PathBuf {
        if let Some(out) = &self.out {
            return out.clone();
        }
        let dir = self
            .seg
            .parent()
            .map(|p| p.join("qc"))
            .unwrap_or_else(|| PathBuf::from("qc"));
        dir.join(format!(
            "{}_qc.png",
            hippmapper_volume::nifti::file_stem(&self.seg)
        ))
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.config.load()?;
        let renderer: Arc<dyn MosaicRenderer> = match config.backend {
            Backend::Native => Arc::new(NativeMosaic),
            Backend::External => {
                Arc::new(AntsMosaic::new(config.tools.clone()).with_timeout(config.tool_timeout()))
            }
        };

        let params = MosaicParams {
            gap: self.gap,
            direction: self.direction,
            alpha: self.alpha,
            ..MosaicParams::segmentation_qc()
        };
        let out = self.output();
        if let Some(dir) = out.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        info!("Rendering QC mosaic with {}", renderer.name());
        renderer
            .render(&self.t1, Some(self.seg.as_path()), &out, &params, &ctrl_c_token())
            .await
            .context("Failed to render QC mosaic")?;
        info!("QC image written to {}", out.display());
        Ok(())
    }
}
