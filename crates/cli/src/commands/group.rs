//! Group mode: many subjects, one orchestrator

use super::{ctrl_c_token, ConfigArgs};
use anyhow::{Context as _, Result};
use clap::{ArgGroup, Args};
use hippmapper_common::SubjectRef;
use hippmapper_pipeline::{discover_subjects, GroupRunner, Orchestrator, RunOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args)]
#[command(group(ArgGroup::new("subjects").required(true).args(["root", "dirs"])))]
pub struct GroupCommand {
    /// Study root; every subdirectory is a subject
    #[arg(short, long, value_name = "DIR")]
    pub(crate) root: Option<PathBuf>,

    /// Subject directories
    #[arg(value_name = "SUBJECTS")]
    pub(crate) dirs: Vec<PathBuf>,

    /// Session subdirectory to use in every subject
    #[arg(long)]
    pub(crate) ses: Option<String>,

    /// Maximum subjects segmented at once
    #[arg(short, long)]
    pub(crate) jobs: Option<usize>,

    /// Segment even if a prediction already exists
    #[arg(short, long)]
    pub(crate) force: bool,

    /// Monte-Carlo samples for the uncertainty estimate
    #[arg(short = 'n', long = "num-mc")]
    pub(crate) num_mc: Option<usize>,

    /// Seed for the stochastic passes
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    /// Write the group report as JSON
    #[arg(long, value_name = "JSON")]
    pub(crate) report: Option<PathBuf>,

    /// Print one JSON line per finished subject
    #[arg(long)]
    pub(crate) jsonl: bool,

    #[command(flatten)]
    pub(crate) config: ConfigArgs,
}

impl GroupCommand {
    fn subjects(&self) -> Result<Vec<SubjectRef>> {
        if let Some(root) = &self.root {
            return discover_subjects(root, self.ses.as_deref())
                .with_context(|| format!("Failed to list subjects in {}", root.display()));
        }
        Ok(self
            .dirs
            .iter()
            .filter(|dir| {
                if dir.is_dir() {
                    true
                } else {
                    warn!("Skipping non-existent subject: {}", dir.display());
                    false
                }
            })
            .map(|dir| SubjectRef::BySubjectDirectory {
                dir: dir.clone(),
                session: self.ses.clone(),
            })
            .collect())
    }

    pub async fn execute(self) -> Result<()> {
        let subjects = self.subjects()?;
        if subjects.is_empty() {
            anyhow::bail!("No subjects found");
        }

        let config = self.config.load()?;
        let orchestrator = Orchestrator::from_config(config)
            .context("Failed to set up the pipeline")?
            .with_cancel_token(ctrl_c_token());
        let mut runner = GroupRunner::new(Arc::new(orchestrator));
        if let Some(jobs) = self.jobs {
            runner = runner.with_max_concurrent(jobs);
        }

        let options = RunOptions {
            force: self.force,
            seed: self.seed,
            samples: self.num_mc,
            ..RunOptions::default()
        };

        if self.jsonl {
            let mut rx = runner.run_streaming(subjects, &options);
            while let Some(result) = rx.recv().await {
                let line = match &result.result {
                    Ok(report) => serde_json::json!({
                        "type": "success",
                        "subject": result.subject.to_string(),
                        "status": report.status,
                        "prediction": report.prediction,
                        "processing_time_ms": result.processing_time.as_millis(),
                        "warnings": report.warnings,
                    }),
                    Err(error) => serde_json::json!({
                        "type": "error",
                        "subject": result.subject.to_string(),
                        "error": error,
                    }),
                };
                println!("{}", line);
            }
            return Ok(());
        }

        let report = runner.run(subjects, &options).await;
        for (index, subject) in report.subjects.iter().enumerate() {
            match &subject.error {
                None => info!(
                    "✓ [{}/{}] {} - {} ({:.2}s)",
                    index + 1,
                    report.total,
                    subject.subject,
                    subject.status,
                    subject.seconds
                ),
                Some(error) => warn!(
                    "✗ [{}/{}] {} - FAILED: {}",
                    index + 1,
                    report.total,
                    subject.subject,
                    error
                ),
            }
        }

        if let Some(path) = &self.report {
            report
                .write_json(path)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        if report.failed > 0 {
            anyhow::bail!("{} of {} subjects failed", report.failed, report.total);
        }
        Ok(())
    }
}

