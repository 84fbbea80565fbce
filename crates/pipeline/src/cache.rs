//! Stage cache keys and freshness checks

use crate::config::CachePolicy;
use crate::error::Result;
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Content-addressed key of one stage execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageKey {
    pub stage: String,
    pub version: u32,
    /// Hash of the serialized stage parameters
    pub params_hash: String,
    /// Hash of the stage's input files, in order
    pub input_hash: String,
}

fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

impl StageKey {
    pub fn compute(stage: Stage, params: &impl Serialize, inputs: &[&Path]) -> Result<Self> {
        let params_json = serde_json::to_vec(params)?;
        let mut inputs_hasher = blake3::Hasher::new();
        for input in inputs {
            inputs_hasher.update(hash_file(input)?.as_bytes());
        }
        Ok(Self {
            stage: stage.name().to_string(),
            version: stage.version(),
            params_hash: blake3::hash(&params_json).to_hex().to_string(),
            input_hash: inputs_hasher.finalize().to_hex().to_string(),
        })
    }

    pub fn to_key_string(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.stage, self.version, self.input_hash, self.params_hash
        )
    }
}

/// Sidecar holding the key an artifact was produced with
pub fn key_path(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!("{}.key", name))
}

#[derive(Debug, Clone, Copy)]
pub struct StageCache {
    policy: CachePolicy,
}

impl StageCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Key for a stage execution; input files are only hashed when the
    /// policy compares keys
    pub fn key(&self, stage: Stage, params: &impl Serialize, inputs: &[&Path]) -> Result<StageKey> {
        match self.policy {
            CachePolicy::ContentAddressed => StageKey::compute(stage, params, inputs),
            CachePolicy::Existence => StageKey::compute(stage, params, &[]),
        }
    }

    /// Whether `artifact` can be reused instead of recomputing its stage
    pub fn is_fresh(&self, artifact: &Path, key: &StageKey) -> bool {
        if !artifact.exists() {
            return false;
        }
        match self.policy {
            CachePolicy::Existence => true,
            CachePolicy::ContentAddressed => {
                let recorded = std::fs::read_to_string(key_path(artifact)).ok();
                let expected = key.to_key_string();
                let fresh = recorded.as_deref().map(str::trim) == Some(expected.as_str());
                if !fresh {
                    debug!("Stale artifact {}", artifact.display());
                }
                fresh
            }
        }
    }

    pub fn record(&self, artifact: &Path, key: &StageKey) -> Result<()> {
        if self.policy == CachePolicy::ContentAddressed {
            std::fs::write(key_path(artifact), key.to_key_string())?;
        }
        Ok(())
    }

    /// Drop the recorded key so the artifact is recomputed next time
    pub fn invalidate(&self, artifact: &Path) {
        let sidecar = key_path(artifact);
        if sidecar.exists() {
            if let Err(e) = std::fs::remove_file(&sidecar) {
                warn!("Could not remove {}: {}", sidecar.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Params {
        percent: f32,
    }

    #[test]
    fn test_key_tracks_inputs_and_params() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("t1.nii.gz");
        std::fs::write(&input, b"voxels").unwrap();

        let key = StageKey::compute(Stage::IntensityThreshold, &Params { percent: 10.0 }, &[&input])
            .unwrap();
        let same =
            StageKey::compute(Stage::IntensityThreshold, &Params { percent: 10.0 }, &[&input])
                .unwrap();
        assert_eq!(key, same);

        let other_params =
            StageKey::compute(Stage::IntensityThreshold, &Params { percent: 20.0 }, &[&input])
                .unwrap();
        assert_ne!(key.params_hash, other_params.params_hash);
        assert_eq!(key.input_hash, other_params.input_hash);

        std::fs::write(&input, b"other voxels").unwrap();
        let other_input =
            StageKey::compute(Stage::IntensityThreshold, &Params { percent: 10.0 }, &[&input])
                .unwrap();
        assert_ne!(key.input_hash, other_input.input_hash);
    }

    #[test]
    fn test_content_addressed_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.nii.gz");
        let artifact = dir.path().join("out.nii.gz");
        std::fs::write(&input, b"a").unwrap();
        let key = StageKey::compute(Stage::Crop, &1usize, &[&input]).unwrap();

        let cache = StageCache::new(CachePolicy::ContentAddressed);
        assert!(!cache.is_fresh(&artifact, &key));

        std::fs::write(&artifact, b"out").unwrap();
        assert!(!cache.is_fresh(&artifact, &key));

        cache.record(&artifact, &key).unwrap();
        assert!(cache.is_fresh(&artifact, &key));

        std::fs::write(&input, b"b").unwrap();
        let changed = StageKey::compute(Stage::Crop, &1usize, &[&input]).unwrap();
        assert!(!cache.is_fresh(&artifact, &changed));

        cache.invalidate(&artifact);
        assert!(!cache.is_fresh(&artifact, &key));
    }

    #[test]
    fn test_existence_policy_ignores_keys() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.nii.gz");
        std::fs::write(&artifact, b"out").unwrap();
        let key = StageKey::compute(Stage::Crop, &1usize, &[]).unwrap();

        let cache = StageCache::new(CachePolicy::Existence);
        assert!(cache.is_fresh(&artifact, &key));
        cache.record(&artifact, &key).unwrap();
        assert!(!key_path(&artifact).exists());
    }
}
