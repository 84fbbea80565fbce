//! Hippocampus segmentation pipeline
//!
//! [`Orchestrator::run`] takes one subject through bias correction,
//! orientation normalization, the coarse network, a region of interest
//! around its mask, the fine Monte Carlo dropout ensemble and the final
//! left/right labeling. [`GroupRunner`] does the same for many subjects and
//! [`stats`] summarizes finished predictions.
//!
//! # Example
//! ```no_run
//! use hippmapper_common::SubjectRef;
//! use hippmapper_pipeline::{Orchestrator, PipelineConfig, RunOptions};
//!
//! # async fn example() -> hippmapper_pipeline::Result<()> {
//! let config = PipelineConfig::from_yaml("config/hippmapper.yaml")?;
//! let orchestrator = Orchestrator::from_config(config)?;
//! let report = orchestrator
//!     .run(&SubjectRef::directory("/data/sub01"), &RunOptions::default())
//!     .await?;
//! println!("{}", report.prediction.display());
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod group;
pub mod lock;
pub mod orchestrator;
pub mod orientation;
pub mod stages;
pub mod stats;
pub mod subject;

pub use cache::{StageCache, StageKey};
pub use config::{Backend, CachePolicy, ModelConfig, PipelineConfig, QcConfig, RoiPolicy};
pub use error::{PipelineError, Result};
pub use group::{discover_subjects, GroupReport, GroupRunner, SubjectResult, SubjectSummary};
pub use lock::SubjectLock;
pub use orchestrator::{
    Collaborators, Orchestrator, RunOptions, RunStatus, SegmentationReport, StageOutcome,
    StageRecord,
};
pub use orientation::{OrientationNormalizer, OrientationOutcome};
pub use stages::{Stage, StagePaths};
pub use subject::{resolve, ResolvedSubject, SubjectMode};
