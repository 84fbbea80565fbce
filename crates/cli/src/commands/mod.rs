//! Subcommand implementations

pub mod bias_corr;
pub mod group;
pub mod seg_hipp;
pub mod seg_qc;
pub mod stats;
pub mod trim_like;

use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use hippmapper_common::CancelToken;
use hippmapper_pipeline::{Backend, PipelineConfig};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// In-process implementations
    Native,
    /// c3d and FSL executables
    External,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Native => Backend::Native,
            BackendArg::External => Backend::External,
        }
    }
}

/// Options shared by every command that loads the pipeline configuration
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Pipeline configuration file (YAML)
    #[arg(long, value_name = "YAML")]
    pub config: Option<PathBuf>,

    /// Directory holding the ONNX models
    #[arg(long, value_name = "DIR")]
    pub models: Option<PathBuf>,

    /// Implementation of the volume tools
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Directory of the c3d executable
    #[arg(long, value_name = "DIR")]
    pub c3d_bin: Option<PathBuf>,

    /// Directory of the ANTs executables
    #[arg(long, value_name = "DIR")]
    pub ants_bin: Option<PathBuf>,

    /// Directory of the FSL executables
    #[arg(long, value_name = "DIR")]
    pub fsl_bin: Option<PathBuf>,
}

impl ConfigArgs {
    /// Configuration file contents with the flags applied on top
    pub fn load(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_yaml(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(models) = &self.models {
            config.models.dir = models.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        if let Some(dir) = &self.c3d_bin {
            config.tools = config.tools.with_c3d_bin(dir);
        }
        if let Some(dir) = &self.ants_bin {
            config.tools = config.tools.with_ants_bin(dir);
        }
        if let Some(dir) = &self.fsl_bin {
            config.tools = config.tools.with_fsl_bin(dir);
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// A token cancelled by Ctrl-C
pub fn ctrl_c_token() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next stage boundary");
            handle.cancel();
        }
    });
    cancel
}
