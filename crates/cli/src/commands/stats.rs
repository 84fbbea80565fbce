//! Hemisphere volume summary

use anyhow::{Context as _, Result};
use clap::Args;
use hippmapper_pipeline::stats::{collect_volumes, write_volumes_csv, DEFAULT_STATS_FILE};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct StatsCommand {
    /// Study root holding one directory per subject
    #[arg(short, long, value_name = "DIR")]
    pub(crate) root: PathBuf,

    /// Output CSV, defaults to `<root>/hipp_volumes.csv`
    #[arg(short, long, value_name = "CSV")]
    pub(crate) out: Option<PathBuf>,
}

impl StatsCommand {
    pub async fn execute(self) -> Result<()> {
        let out = self
            .out
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_STATS_FILE));

        let rows = collect_volumes(&self.root)
            .with_context(|| format!("Failed to collect volumes under {}", self.root.display()))?;
        if rows.is_empty() {
            anyhow::bail!("No predictions found under {}", self.root.display());
        }
        write_volumes_csv(&rows, &out)
            .with_context(|| format!("Failed to write {}", out.display()))?;

        info!("Volumes of {} subjects written to {}", rows.len(), out.display());
        Ok(())
    }
}
