//! Locating a subject's T1 image on disk

use crate::error::{PipelineError, Result};
use glob::Pattern;
use hippmapper_common::SubjectRef;
use hippmapper_volume::nifti::{file_stem, is_nifti_path};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How the prediction is named for a resolved subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectMode {
    Directory,
    DirectFile,
}

impl SubjectMode {
    pub fn prediction_name(self) -> &'static str {
        match self {
            SubjectMode::Directory => "T1acq_hipp_pred",
            SubjectMode::DirectFile => "hipp_pred",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubject {
    pub id: String,
    pub dir: PathBuf,
    pub t1: PathBuf,
    /// The T1 found is not bias corrected yet
    pub needs_bias: bool,
    pub mode: SubjectMode,
}

fn glob_in(dir: &Path, name_pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}",
        Pattern::escape(&dir.to_string_lossy()),
        name_pattern
    );
    let mut matches = Vec::new();
    for entry in glob::glob(&pattern)? {
        matches.push(entry?);
    }
    matches.sort();
    Ok(matches)
}

/// Exactly one NIfTI file `<id><suffix>.*` in `dir`, or `None`
fn single_image(dir: &Path, id: &str, suffix: &str) -> Result<Option<PathBuf>> {
    let name_pattern = format!("{}{}.*", Pattern::escape(id), suffix);
    let mut matches: Vec<PathBuf> = glob_in(dir, &name_pattern)?
        .into_iter()
        .filter(|p| p.is_file() && is_nifti_path(p))
        .collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches.swap_remove(0))),
        _ => Err(PipelineError::AmbiguousInput {
            pattern: dir.join(&name_pattern).display().to_string(),
            matches,
        }),
    }
}

fn session_dir(dir: &Path, session: &str) -> Result<PathBuf> {
    let mut matches: Vec<PathBuf> = glob_in(dir, &format!("*{}*", Pattern::escape(session)))?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    match matches.len() {
        0 => Err(PipelineError::SessionNotFound {
            dir: dir.to_path_buf(),
            session: session.to_string(),
        }),
        1 => Ok(matches.swap_remove(0)),
        _ => Err(PipelineError::AmbiguousSession {
            session: session.to_string(),
            matches,
        }),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::MissingInput(path.display().to_string()))
}

/// Find the T1 image and subject directory for `subject`
///
/// In a subject directory `<id>_T1_nu.*` is preferred; otherwise `<id>_T1.*`
/// is used and marked for bias correction.
pub fn resolve(subject: &SubjectRef) -> Result<ResolvedSubject> {
    match subject {
        SubjectRef::BySubjectDirectory { dir, session } => {
            if !dir.is_dir() {
                return Err(PipelineError::MissingInput(dir.display().to_string()));
            }
            let dir = match session {
                Some(session) => session_dir(dir, session)?,
                None => dir.clone(),
            };
            let dir = absolute(&dir)?;
            let id = base_name(&dir)?;

            let (t1, needs_bias) = if let Some(t1) = single_image(&dir, &id, "_T1_nu")? {
                (t1, false)
            } else if let Some(t1) = single_image(&dir, &id, "_T1")? {
                info!(
                    "Found uncorrected {}, it will be bias field corrected first",
                    t1.display()
                );
                (t1, true)
            } else {
                return Err(PipelineError::MissingInput(format!(
                    "no {}_T1_nu or {}_T1 image in {}",
                    id,
                    id,
                    dir.display()
                )));
            };
            debug!("Resolved subject {} to {}", id, t1.display());
            Ok(ResolvedSubject {
                id,
                dir,
                t1,
                needs_bias,
                mode: SubjectMode::Directory,
            })
        }
        SubjectRef::ByDirectFile { path } => {
            if !path.is_file() {
                return Err(PipelineError::MissingInput(path.display().to_string()));
            }
            let t1 = absolute(path)?;
            let dir = t1
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| PipelineError::MissingInput(t1.display().to_string()))?;
            Ok(ResolvedSubject {
                id: file_stem(&t1),
                dir,
                t1,
                needs_bias: false,
                mode: SubjectMode::DirectFile,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_prefers_bias_corrected_t1() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sub01");
        fs::create_dir(&dir).unwrap();
        touch(&dir.join("sub01_T1.nii.gz"));
        touch(&dir.join("sub01_T1_nu.nii.gz"));

        let resolved = resolve(&SubjectRef::directory(&dir)).unwrap();
        assert_eq!(resolved.id, "sub01");
        assert_eq!(resolved.t1, dir.join("sub01_T1_nu.nii.gz"));
        assert!(!resolved.needs_bias);
        assert_eq!(resolved.mode.prediction_name(), "T1acq_hipp_pred");
    }

    #[test]
    fn test_raw_t1_forces_bias_correction() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sub02");
        fs::create_dir(&dir).unwrap();
        touch(&dir.join("sub02_T1.nii"));
        touch(&dir.join("sub02_T1_std_orient.nii.gz"));

        let resolved = resolve(&SubjectRef::directory(&dir)).unwrap();
        assert_eq!(resolved.t1, dir.join("sub02_T1.nii"));
        assert!(resolved.needs_bias);
    }

    #[test]
    fn test_ambiguous_and_missing_inputs() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sub03");
        fs::create_dir(&dir).unwrap();
        assert!(matches!(
            resolve(&SubjectRef::directory(&dir)),
            Err(PipelineError::MissingInput(_))
        ));

        touch(&dir.join("sub03_T1_nu.nii"));
        touch(&dir.join("sub03_T1_nu.nii.gz"));
        match resolve(&SubjectRef::directory(&dir)) {
            Err(PipelineError::AmbiguousInput { matches, .. }) => assert_eq!(matches.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_session_resolution() {
        let root = tempfile::tempdir().unwrap();
        let subject = root.path().join("sub04");
        let session = subject.join("sub04_ses-01");
        fs::create_dir_all(&session).unwrap();
        fs::create_dir_all(subject.join("sub04_ses-02")).unwrap();
        touch(&session.join("sub04_ses-01_T1_nu.nii.gz"));

        let resolved = resolve(&SubjectRef::session(&subject, "ses-01")).unwrap();
        assert_eq!(resolved.id, "sub04_ses-01");
        assert_eq!(resolved.dir, session);

        assert!(matches!(
            resolve(&SubjectRef::session(&subject, "ses-03")),
            Err(PipelineError::SessionNotFound { .. })
        ));
        assert!(matches!(
            resolve(&SubjectRef::session(&subject, "ses")),
            Err(PipelineError::AmbiguousSession { .. })
        ));
    }

    #[test]
    fn test_direct_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("mprage.nii.gz");
        touch(&path);
        let resolved = resolve(&SubjectRef::file(&path)).unwrap();
        assert_eq!(resolved.id, "mprage");
        assert_eq!(resolved.dir, root.path());
        assert_eq!(resolved.mode, SubjectMode::DirectFile);
        assert!(!resolved.needs_bias);

        assert!(matches!(
            resolve(&SubjectRef::file(root.path().join("absent.nii.gz"))),
            Err(PipelineError::MissingInput(_))
        ));
    }
}
