//! Per-subject exclusive lock

use crate::error::{PipelineError, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = ".hippmapper.lock";

/// Held while a run writes into a subject's artifact directory
///
/// The lock file is removed on drop. A file left by a crashed run has to be
/// deleted by hand.
#[derive(Debug)]
pub struct SubjectLock {
    path: PathBuf,
}

impl SubjectLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PipelineError::SubjectLocked(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SubjectLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Could not release {}: {}", self.path.display(), e);
        }
    }
}
