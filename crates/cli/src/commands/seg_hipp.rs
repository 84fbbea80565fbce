//! Single-subject segmentation

use super::{ctrl_c_token, ConfigArgs};
use anyhow::{Context as _, Result};
use clap::{ArgGroup, Args};
use hippmapper_common::SubjectRef;
use hippmapper_pipeline::{resolve, Orchestrator, RunOptions, RunStatus, StageOutcome};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
#[command(group(ArgGroup::new("input").required(true).args(["subj", "t1"])))]
pub struct SegHippCommand {
    /// Subject directory named after the subject id
    #[arg(short, long, value_name = "DIR")]
    pub(crate) subj: Option<PathBuf>,

    /// T1 volume, bypassing subject directory conventions
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) t1: Option<PathBuf>,

    /// Session subdirectory to use, matched by name fragment
    #[arg(long, requires = "subj")]
    pub(crate) ses: Option<String>,

    /// Segment even if the prediction already exists
    #[arg(short, long)]
    pub(crate) force: bool,

    /// Bias field correct even when a corrected T1 was found
    #[arg(short, long)]
    pub(crate) bias: bool,

    /// Keep the T1 in its scanner orientation
    #[arg(long = "ign-ort")]
    pub(crate) ignore_orientation: bool,

    /// Monte-Carlo samples for the uncertainty estimate
    #[arg(short = 'n', long = "num-mc")]
    pub(crate) num_mc: Option<usize>,

    /// Seed for the stochastic passes
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    /// Output path of the labeled prediction
    #[arg(short, long, value_name = "NIFTI")]
    pub(crate) out: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long, value_name = "JSON")]
    pub(crate) report: Option<PathBuf>,

    #[command(flatten)]
    pub(crate) config: ConfigArgs,
}

impl SegHippCommand {
    fn subject(&self) -> Option<SubjectRef> {
        match (&self.subj, &self.t1) {
            (Some(dir), _) => Some(SubjectRef::BySubjectDirectory {
                dir: dir.clone(),
                session: self.ses.clone(),
            }),
            (None, Some(t1)) => Some(SubjectRef::file(t1)),
            (None, None) => None,
        }
    }

    /// `<subject dir>/logs`, when the subject resolves
    pub fn log_dir(&self) -> Option<PathBuf> {
        let subject = self.subject()?;
        resolve(&subject).ok().map(|s| s.dir.join("logs"))
    }

    pub async fn execute(self) -> Result<()> {
        let subject = self
            .subject()
            .context("Either --subj or --t1 is required")?;

        info!("=== Hippocampus Segmentation ===");
        info!("Subject: {}", subject);

        let config = self.config.load()?;
        let orchestrator = Orchestrator::from_config(config)
            .context("Failed to set up the pipeline")?
            .with_cancel_token(ctrl_c_token());

        let options = RunOptions {
            force: self.force,
            bias: self.bias,
            ignore_orientation: self.ignore_orientation,
            output: self.out.clone(),
            seed: self.seed,
            samples: self.num_mc,
        };
        let report = orchestrator
            .run(&subject, &options)
            .await
            .with_context(|| format!("Segmentation failed for {}", subject))?;

        match report.status {
            RunStatus::AlreadyDone => {
                info!(
                    "{} already exists, skipping (use --force to rerun)",
                    report.prediction.display()
                );
            }
            RunStatus::Completed => {
                let computed = report
                    .stages
                    .iter()
                    .filter(|r| r.outcome == StageOutcome::Computed)
                    .count();
                let cached = report
                    .stages
                    .iter()
                    .filter(|r| r.outcome == StageOutcome::Cached)
                    .count();
                info!("=== Segmentation Complete ===");
                info!("Prediction: {}", report.prediction.display());
                info!("Stages computed: {}, cached: {}", computed, cached);
                info!("Total time: {:.2}s", report.seconds);
            }
        }
        for warning in &report.warnings {
            warn!("{}", warning);
        }

        if let Some(path) = &self.report {
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        Ok(())
    }
}
