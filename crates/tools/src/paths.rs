//! Locations of the external toolkits
//!
//! Each toolkit is found either in a configured bin directory or, when none is
//! set, by bare program name on the inherited `PATH`. The process environment
//! is never modified.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Directory holding `c3d`
    pub c3d_bin: Option<PathBuf>,
    /// Directory holding `N4BiasFieldCorrection` and the ANTs mosaic tools
    pub ants_bin: Option<PathBuf>,
    /// Directory holding `fslmaths`
    pub fsl_bin: Option<PathBuf>,
}

fn program(dir: Option<&Path>, name: &str) -> PathBuf {
    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

impl ToolPaths {
    pub fn with_c3d_bin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.c3d_bin = Some(dir.into());
        self
    }

    pub fn with_ants_bin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ants_bin = Some(dir.into());
        self
    }

    pub fn with_fsl_bin(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fsl_bin = Some(dir.into());
        self
    }

    pub fn c3d(&self) -> PathBuf {
        program(self.c3d_bin.as_deref(), "c3d")
    }

    pub fn ants(&self, tool: &str) -> PathBuf {
        program(self.ants_bin.as_deref(), tool)
    }

    pub fn fslmaths(&self) -> PathBuf {
        program(self.fsl_bin.as_deref(), "fslmaths")
    }

    /// `FSLDIR` for child processes: the parent of the configured bin directory
    pub fn fsl_dir(&self) -> Option<&Path> {
        self.fsl_bin.as_deref().and_then(Path::parent)
    }
}
