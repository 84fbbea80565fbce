//! N4 bias field correction of a single volume

use super::{ctrl_c_token, ConfigArgs};
use anyhow::{Context as _, Result};
use clap::Args;
use hippmapper_tools::{BiasFieldCorrector, N4Corrector};
use hippmapper_volume::nifti::file_stem;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Args)]
pub struct BiasCorrCommand {
    /// T1 volume to correct
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) t1: PathBuf,

    /// Restrict the field estimate to this mask
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) mask: Option<PathBuf>,

    /// Output path, defaults to `<t1 stem>_nu.nii.gz` next to the input
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) out: Option<PathBuf>,

    /// ITK worker threads
    #[arg(long)]
    pub(crate) threads: Option<usize>,

    #[command(flatten)]
    pub(crate) config: ConfigArgs,
}

impl BiasCorrCommand {
    fn output(&self) -> PathBuf {
        self.out.clone().unwrap_or_else(|| {
            self.t1
                .with_file_name(format!("{}_nu.nii.gz", file_stem(&self.t1)))
        })
    }

    pub async fn execute(self) -> Result<()> {
        let config = self.config.load()?;
        let mut params = config.bias.clone();
        if let Some(mask) = &self.mask {
            params.mask = Some(mask.clone());
        }
        if let Some(threads) = self.threads {
            params.threads = Some(threads);
        }

        let out = self.output();
        let corrector = N4Corrector::new(config.tools.clone()).with_timeout(config.tool_timeout());
        let start = Instant::now();
        corrector
            .correct(&self.t1, &out, &params, &ctrl_c_token())
            .await
            .with_context(|| format!("Bias field correction failed for {}", self.t1.display()))?;

        info!(
            "✓ {} written in {:.2}s",
            out.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
