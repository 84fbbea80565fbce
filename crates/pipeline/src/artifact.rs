//! Atomic publication of stage artifacts
//!
//! Output is written to a hidden `.partial-<name>` sibling and renamed over
//! the final path only once complete. The partial name keeps the original
//! extension, so format detection by suffix still works.

use crate::error::Result;
use hippmapper_volume::nifti::write_nifti;
use hippmapper_volume::Volume;
use std::path::{Path, PathBuf};
use tracing::warn;

pub fn partial_path(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!(".partial-{}", name))
}

/// Move a finished partial file into place
pub fn commit(partial: &Path, artifact: &Path) -> Result<()> {
    std::fs::rename(partial, artifact)?;
    Ok(())
}

/// Remove a partial file left by a failed stage
pub fn discard(partial: &Path) {
    if partial.exists() {
        if let Err(e) = std::fs::remove_file(partial) {
            warn!("Could not remove {}: {}", partial.display(), e);
        }
    }
}

/// Write a stage's secondary volume through its own partial path
pub fn publish_volume(artifact: &Path, volume: &Volume) -> Result<()> {
    let partial = partial_path(artifact);
    if let Err(e) = write_nifti(&partial, volume) {
        discard(&partial);
        return Err(e.into());
    }
    commit(&partial, artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippmapper_volume::Affine;
    use ndarray::Array3;

    fn small_volume() -> Volume {
        Volume::new(Array3::from_elem((4, 4, 4), 1.0), Affine::identity()).unwrap()
    }

    #[test]
    fn test_partial_keeps_extension() {
        let partial = partial_path(Path::new("/s/pred_process/a_T1.nii.gz"));
        assert_eq!(partial, PathBuf::from("/s/pred_process/.partial-a_T1.nii.gz"));
    }

    #[test]
    fn test_commit_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.png");
        let partial = partial_path(&artifact);
        std::fs::write(&partial, b"png").unwrap();
        commit(&partial, &artifact).unwrap();
        assert!(artifact.exists());
        assert!(!partial.exists());

        std::fs::write(&partial, b"half").unwrap();
        discard(&partial);
        assert!(!partial.exists());
    }

    #[test]
    fn test_publish_volume_leaves_only_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("mask.nii.gz");
        publish_volume(&artifact, &small_volume()).unwrap();
        assert!(artifact.exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["mask.nii.gz".to_string()]);
    }

    #[test]
    fn test_failed_publish_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("missing/mask.nii.gz");
        assert!(publish_volume(&artifact, &small_volume()).is_err());
        assert!(!artifact.exists());
        assert!(!partial_path(&artifact).exists());
    }
}
