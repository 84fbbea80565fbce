//! Bringing a T1 into one of the two accepted anatomical orientations
//!
//! RAS and LAS are accepted as is. Anything else is reoriented to LAS when
//! its codes contain an L axis and to RAS otherwise. Oblique grids fall back
//! to the closest axis-aligned code the probe can offer; when it offers
//! none the volume is left untouched and the outcome says why.
//!
//! A reoriented image is keyed on the input and the codes like any other
//! stage artifact, so replacing the T1 in place reorients it again.

use crate::artifact::{commit, discard, partial_path};
use crate::cache::StageCache;
use crate::error::Result;
use crate::stages::Stage;
use hippmapper_common::CancelToken;
use hippmapper_tools::{OrientationProbe, ProbedOrientation, ReorientTool};
use hippmapper_volume::{AxisCode, AxisCodes};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Accepted orientation for a detected code, `None` when no change is needed
pub fn standard_target(codes: &AxisCodes) -> Option<AxisCodes> {
    if *codes == AxisCodes::RAS || *codes == AxisCodes::LAS {
        return None;
    }
    if codes.contains(AxisCode::L) {
        Some(AxisCodes::LAS)
    } else {
        Some(AxisCodes::RAS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrientationOutcome {
    AlreadyStandard(AxisCodes),
    Reoriented {
        from: AxisCodes,
        to: AxisCodes,
        path: PathBuf,
    },
    /// A reoriented image of the same input was already on disk
    SkippedExisting { path: PathBuf },
    /// No usable orientation; the input is used unchanged
    Unresolved { reason: String },
}

impl OrientationOutcome {
    pub fn was_reoriented(&self) -> bool {
        matches!(
            self,
            OrientationOutcome::Reoriented { .. } | OrientationOutcome::SkippedExisting { .. }
        )
    }

    /// Image later stages should read
    pub fn effective_path<'a>(&'a self, input: &'a Path) -> &'a Path {
        match self {
            OrientationOutcome::Reoriented { path, .. }
            | OrientationOutcome::SkippedExisting { path } => path,
            _ => input,
        }
    }
}

pub struct OrientationNormalizer {
    probe: Arc<dyn OrientationProbe>,
    reorient: Arc<dyn ReorientTool>,
}

impl OrientationNormalizer {
    pub fn new(probe: Arc<dyn OrientationProbe>, reorient: Arc<dyn ReorientTool>) -> Self {
        Self { probe, reorient }
    }

    pub async fn ensure_standard_orientation(
        &self,
        input: &Path,
        output: &Path,
        cache: &StageCache,
        cancel: &CancelToken,
    ) -> Result<OrientationOutcome> {
        let detected = match self.probe.probe(input, cancel).await? {
            ProbedOrientation::Aligned(codes) => codes,
            ProbedOrientation::Oblique {
                closest: Some(codes),
                raw,
            } => {
                warn!(
                    "{} is oblique ({}), using closest orientation {}",
                    input.display(),
                    raw,
                    codes
                );
                codes
            }
            ProbedOrientation::Oblique { closest: None, raw } => {
                let reason = format!("oblique orientation {:?} has no usable fallback code", raw);
                warn!("{}: {}, keeping the original image", input.display(), reason);
                return Ok(OrientationOutcome::Unresolved { reason });
            }
        };

        let Some(target) = standard_target(&detected) else {
            info!("{} is already {}", input.display(), detected);
            return Ok(OrientationOutcome::AlreadyStandard(detected));
        };

        let codes = (detected.to_string(), target.to_string(), self.reorient.name());
        let key = cache.key(Stage::OrientationNormalize, &codes, &[input])?;
        if cache.is_fresh(output, &key) {
            info!("Reoriented image {} already exists", output.display());
            return Ok(OrientationOutcome::SkippedExisting {
                path: output.to_path_buf(),
            });
        }
        cache.invalidate(output);

        info!("Reorienting {} from {} to {}", input.display(), detected, target);
        let partial = partial_path(output);
        if let Err(e) = self.reorient.reorient(input, &partial, target, cancel).await {
            discard(&partial);
            return Err(e.into());
        }
        commit(&partial, output)?;
        cache.record(output, &key)?;
        Ok(OrientationOutcome::Reoriented {
            from: detected,
            to: target,
            path: output.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CachePolicy;
    use async_trait::async_trait;
    use hippmapper_tools::Result as ToolResult;
    use std::sync::Mutex;

    struct FixedProbe(ProbedOrientation);

    #[async_trait]
    impl OrientationProbe for FixedProbe {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn probe(
            &self,
            _input: &Path,
            _cancel: &CancelToken,
        ) -> ToolResult<ProbedOrientation> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingReorient {
        targets: Mutex<Vec<AxisCodes>>,
    }

    #[async_trait]
    impl ReorientTool for RecordingReorient {
        fn name(&self) -> &str {
            "recording"
        }

        async fn reorient(
            &self,
            _input: &Path,
            output: &Path,
            target: AxisCodes,
            _cancel: &CancelToken,
        ) -> ToolResult<()> {
            self.targets.lock().unwrap().push(target);
            std::fs::write(output, b"reoriented")?;
            Ok(())
        }
    }

    fn build(probed: ProbedOrientation) -> (OrientationNormalizer, Arc<RecordingReorient>) {
        let reorient = Arc::new(RecordingReorient::default());
        let normalizer =
            OrientationNormalizer::new(Arc::new(FixedProbe(probed)), reorient.clone());
        (normalizer, reorient)
    }

    fn content_addressed() -> StageCache {
        StageCache::new(CachePolicy::ContentAddressed)
    }

    #[test]
    fn test_standard_target() {
        assert_eq!(standard_target(&AxisCodes::RAS), None);
        assert_eq!(standard_target(&AxisCodes::LAS), None);
        assert_eq!(standard_target(&"LPI".parse().unwrap()), Some(AxisCodes::LAS));
        assert_eq!(standard_target(&"ASR".parse().unwrap()), Some(AxisCodes::RAS));
        assert_eq!(standard_target(&"PIR".parse().unwrap()), Some(AxisCodes::RAS));
    }

    #[tokio::test]
    async fn test_reorients_and_then_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("t1.nii.gz");
        let output = dir.path().join("t1_std_orient.nii.gz");
        std::fs::write(&input, b"t1").unwrap();
        let cancel = CancelToken::new();
        let cache = content_addressed();
        let (normalizer, reorient) = build(ProbedOrientation::Aligned("LPI".parse().unwrap()));

        let outcome = normalizer
            .ensure_standard_orientation(&input, &output, &cache, &cancel)
            .await
            .unwrap();
        assert!(outcome.was_reoriented());
        assert_eq!(outcome.effective_path(&input), output);
        assert!(output.exists());
        assert!(!partial_path(&output).exists());

        let again = normalizer
            .ensure_standard_orientation(&input, &output, &cache, &cancel)
            .await
            .unwrap();
        assert!(matches!(again, OrientationOutcome::SkippedExisting { .. }));
        assert_eq!(*reorient.targets.lock().unwrap(), vec![AxisCodes::LAS]);
    }

    #[tokio::test]
    async fn test_replaced_input_is_reoriented_again() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("t1.nii.gz");
        let output = dir.path().join("t1_std_orient.nii.gz");
        std::fs::write(&input, b"first scan").unwrap();
        let cancel = CancelToken::new();
        let cache = content_addressed();
        let (normalizer, reorient) = build(ProbedOrientation::Aligned("LPI".parse().unwrap()));

        normalizer
            .ensure_standard_orientation(&input, &output, &cache, &cancel)
            .await
            .unwrap();
        std::fs::write(&input, b"second scan").unwrap();
        let outcome = normalizer
            .ensure_standard_orientation(&input, &output, &cache, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, OrientationOutcome::Reoriented { .. }));
        assert_eq!(reorient.targets.lock().unwrap().len(), 2);

        // Existence only looks at the file on disk
        std::fs::write(&input, b"third scan").unwrap();
        let outcome = normalizer
            .ensure_standard_orientation(
                &input,
                &output,
                &StageCache::new(CachePolicy::Existence),
                &cancel,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, OrientationOutcome::SkippedExisting { .. }));
        assert_eq!(reorient.targets.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_orientation_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("t1.nii.gz");
        let output = dir.path().join("t1_std_orient.nii.gz");
        let (normalizer, reorient) = build(ProbedOrientation::Aligned(AxisCodes::RAS));

        let cache = content_addressed();
        let outcome = normalizer
            .ensure_standard_orientation(&input, &output, &cache, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, OrientationOutcome::AlreadyStandard(AxisCodes::RAS));
        assert_eq!(outcome.effective_path(&input), input);
        assert!(reorient.targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oblique_fallback_and_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("t1.nii.gz");
        let output = dir.path().join("t1_std_orient.nii.gz");
        std::fs::write(&input, b"t1").unwrap();
        let cancel = CancelToken::new();
        let cache = content_addressed();

        let (normalizer, reorient) = build(ProbedOrientation::Oblique {
            closest: Some("RPI".parse().unwrap()),
            raw: "Oblique, closest to RPI".to_string(),
        });
        let outcome = normalizer
            .ensure_standard_orientation(&input, &output, &cache, &cancel)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            OrientationOutcome::Reoriented { to, .. } if to == AxisCodes::RAS
        ));
        assert_eq!(reorient.targets.lock().unwrap().len(), 1);

        std::fs::remove_file(&output).unwrap();
        let (normalizer, reorient) = build(ProbedOrientation::Oblique {
            closest: None,
            raw: "Oblique".to_string(),
        });
        let outcome = normalizer
            .ensure_standard_orientation(&input, &output, &cache, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, OrientationOutcome::Unresolved { .. }));
        assert!(!outcome.was_reoriented());
        assert!(reorient.targets.lock().unwrap().is_empty());
        assert!(!output.exists());
    }
}
