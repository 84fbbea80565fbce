//! Common types shared across the segmentation crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Voxel value for background in a labeled prediction
pub const BACKGROUND_LABEL: f32 = 0.0;

/// Voxel value for the right hippocampus
pub const RIGHT_LABEL: f32 = 1.0;

/// Voxel value for the left hippocampus
pub const LEFT_LABEL: f32 = 2.0;

/// Hemisphere of a labeled structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    Right,
    Left,
}

impl Hemisphere {
    pub fn label(self) -> f32 {
        match self {
            Hemisphere::Right => RIGHT_LABEL,
            Hemisphere::Left => LEFT_LABEL,
        }
    }

    /// Column name used in volumetric summaries
    pub fn column_name(self) -> &'static str {
        match self {
            Hemisphere::Right => "Right_HP_Volume",
            Hemisphere::Left => "Left_HP_Volume",
        }
    }
}

/// How a caller identified the subject to segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectRef {
    /// A subject directory named after the subject id, optionally narrowed
    /// to one session subdirectory by a name fragment
    BySubjectDirectory {
        dir: PathBuf,
        session: Option<String>,
    },

    /// A single T1 volume given directly
    ByDirectFile { path: PathBuf },
}

impl SubjectRef {
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        SubjectRef::BySubjectDirectory {
            dir: dir.into(),
            session: None,
        }
    }

    pub fn session(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        SubjectRef::BySubjectDirectory {
            dir: dir.into(),
            session: Some(session.into()),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        SubjectRef::ByDirectFile { path: path.into() }
    }

    /// The path the caller supplied, before any resolution
    pub fn given_path(&self) -> &Path {
        match self {
            SubjectRef::BySubjectDirectory { dir, .. } => dir,
            SubjectRef::ByDirectFile { path } => path,
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectRef::BySubjectDirectory {
                dir,
                session: Some(session),
            } => write!(f, "{} (session *{}*)", dir.display(), session),
            SubjectRef::BySubjectDirectory { dir, session: None } => {
                write!(f, "{}", dir.display())
            }
            SubjectRef::ByDirectFile { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Cooperative cancellation shared between a run and the tools it launches
///
/// Clones observe the same flag. Once cancelled a token stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender is held by every clone, so this only happens at teardown
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
