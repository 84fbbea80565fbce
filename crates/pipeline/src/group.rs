//! Running many subjects concurrently

use crate::error::Result;
use crate::orchestrator::{Orchestrator, RunOptions, RunStatus, SegmentationReport};
use hippmapper_common::SubjectRef;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

/// Outcome of one subject in a group run
#[derive(Debug, Clone)]
pub struct SubjectResult {
    pub subject: SubjectRef,
    /// Error converted to a string so results can cross task boundaries
    pub result: std::result::Result<SegmentationReport, String>,
    pub processing_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub status: String,
    pub prediction: Option<PathBuf>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub total: usize,
    pub succeeded: usize,
    pub already_done: usize,
    pub failed: usize,
    pub subjects: Vec<SubjectSummary>,
    pub total_seconds: f64,
}

fn subject_name(subject: &SubjectRef) -> String {
    subject
        .given_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| subject.to_string())
}

impl GroupReport {
    fn from_results(results: Vec<SubjectResult>, elapsed: Duration) -> Self {
        let mut succeeded = 0;
        let mut already_done = 0;
        let mut failed = 0;
        let mut subjects: Vec<SubjectSummary> = results
            .into_iter()
            .map(|r| {
                let seconds = r.processing_time.as_secs_f64();
                match r.result {
                    Ok(report) => {
                        let status = match report.status {
                            RunStatus::Completed => {
                                succeeded += 1;
                                "completed"
                            }
                            RunStatus::AlreadyDone => {
                                already_done += 1;
                                "already_done"
                            }
                        };
                        SubjectSummary {
                            subject: report.subject,
                            status: status.to_string(),
                            prediction: Some(report.prediction),
                            error: None,
                            warnings: report.warnings,
                            seconds,
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        SubjectSummary {
                            subject: subject_name(&r.subject),
                            status: "failed".to_string(),
                            prediction: None,
                            error: Some(e),
                            warnings: Vec::new(),
                            seconds,
                        }
                    }
                }
            })
            .collect();
        subjects.sort_by(|a, b| a.subject.cmp(&b.subject));
        Self {
            total: subjects.len(),
            succeeded,
            already_done,
            failed,
            subjects,
            total_seconds: elapsed.as_secs_f64(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

/// Runs the orchestrator once per subject under a concurrency limit
///
/// A failing subject is reported and does not stop the others.
pub struct GroupRunner {
    orchestrator: Arc<Orchestrator>,
    max_concurrent: usize,
}

impl GroupRunner {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            max_concurrent: (num_cpus::get() / 4).max(1),
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Start every subject and stream results as they finish
    pub fn run_streaming(
        &self,
        subjects: Vec<SubjectRef>,
        options: &RunOptions,
    ) -> mpsc::Receiver<SubjectResult> {
        let (tx, rx) = mpsc::channel(100);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        info!("=== Group Run Started ===");
        info!("Total subjects: {}", subjects.len());
        info!("Max concurrent: {}", self.max_concurrent);

        let mut options = options.clone();
        if let Some(output) = options.output.take() {
            warn!(
                "Ignoring output path {} for a group run; \
                 each subject writes into its own directory",
                output.display()
            );
        }

        for subject in subjects {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let orchestrator = self.orchestrator.clone();
            let options = options.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let start_time = Instant::now();

                let result = orchestrator
                    .run(&subject, &options)
                    .await
                    .map_err(|e| e.to_string());
                if let Err(e) = &result {
                    error!("{} failed: {}", subject, e);
                }

                let _ = tx
                    .send(SubjectResult {
                        subject,
                        result,
                        processing_time: start_time.elapsed(),
                    })
                    .await;
            });
        }

        rx
    }

    /// Run every subject and collect a report
    pub async fn run(&self, subjects: Vec<SubjectRef>, options: &RunOptions) -> GroupReport {
        let start = Instant::now();
        let mut rx = self.run_streaming(subjects, options);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        let report = GroupReport::from_results(results, start.elapsed());
        info!("=== Group Run Completed ===");
        info!(
            "Succeeded: {}, already done: {}, failed: {} ({:.2}s)",
            report.succeeded, report.already_done, report.failed, report.total_seconds
        );
        report
    }
}

/// Subject directories directly under `root`, sorted, hidden entries skipped
pub fn discover_subjects(root: &Path, session: Option<&str>) -> Result<Vec<SubjectRef>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if path.is_dir() && !hidden {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs
        .into_iter()
        .map(|dir| SubjectRef::BySubjectDirectory {
            dir,
            session: session.map(str::to_string),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_subjects() {
        let root = tempfile::tempdir().unwrap();
        for name in ["sub02", "sub01", ".cache"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("notes.txt"), b"").unwrap();

        let subjects = discover_subjects(root.path(), Some("ses-01")).unwrap();
        assert_eq!(
            subjects,
            vec![
                SubjectRef::session(root.path().join("sub01"), "ses-01"),
                SubjectRef::session(root.path().join("sub02"), "ses-01"),
            ]
        );
    }

    #[test]
    fn test_report_counts() {
        let report = |name: &str, status| SegmentationReport {
            subject: name.to_string(),
            prediction: PathBuf::from(format!("/{name}/pred.nii.gz")),
            status,
            stages: Vec::new(),
            warnings: Vec::new(),
            seconds: 1.0,
        };
        let results = vec![
            SubjectResult {
                subject: SubjectRef::directory("/b"),
                result: Ok(report("b", RunStatus::Completed)),
                processing_time: Duration::from_secs(2),
            },
            SubjectResult {
                subject: SubjectRef::directory("/c"),
                result: Err("Input not found: /c".to_string()),
                processing_time: Duration::ZERO,
            },
            SubjectResult {
                subject: SubjectRef::directory("/a"),
                result: Ok(report("a", RunStatus::AlreadyDone)),
                processing_time: Duration::ZERO,
            },
        ];
        let group = GroupReport::from_results(results, Duration::from_secs(3));
        assert_eq!(group.total, 3);
        assert_eq!((group.succeeded, group.already_done, group.failed), (1, 1, 1));
        assert_eq!(group.subjects[0].subject, "a");
        assert_eq!(group.subjects[2].error.as_deref(), Some("Input not found: /c"));

        let json = group.to_json().unwrap();
        let back: GroupReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, group);
    }
}
