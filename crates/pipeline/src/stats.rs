//! Hippocampal volumes from finished predictions

use crate::error::Result;
use glob::Pattern;
use hippmapper_common::Hemisphere;
use hippmapper_volume::nifti::read_nifti;
use hippmapper_volume::Volume;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_STATS_FILE: &str = "hipp_volumes.csv";

/// Volumes in mm^3, rounded to three decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemisphereVolumes {
    #[serde(rename = "Subjects")]
    pub subject: String,
    #[serde(rename = "Right_HP_Volume")]
    pub right: f64,
    #[serde(rename = "Left_HP_Volume")]
    pub left: f64,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl HemisphereVolumes {
    pub fn from_prediction(subject: impl Into<String>, prediction: &Volume) -> Self {
        let voxel = prediction.voxel_volume();
        let volume_of = |h: Hemisphere| round3(prediction.count_equal(h.label()) as f64 * voxel);
        Self {
            subject: subject.into(),
            right: volume_of(Hemisphere::Right),
            left: volume_of(Hemisphere::Left),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.right == 0.0 && self.left == 0.0
    }
}

/// The single `*hipp_pred.nii.gz` in a subject directory
fn find_prediction(dir: &Path) -> Result<Option<PathBuf>> {
    let pattern = format!("{}/*hipp_pred.nii.gz", Pattern::escape(&dir.to_string_lossy()));
    let mut matches = Vec::new();
    for entry in glob::glob(&pattern)? {
        matches.push(entry?);
    }
    matches.sort();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches.swap_remove(0))),
        _ => {
            warn!(
                "Skipping {}: more than one prediction ({:?})",
                dir.display(),
                matches
            );
            Ok(None)
        }
    }
}

/// Volumes for every subject directory under `root` that has a prediction
pub fn collect_volumes(root: &Path) -> Result<Vec<HemisphereVolumes>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut rows = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(prediction) = find_prediction(&dir)? else {
            warn!("No prediction in {}, skipping", dir.display());
            continue;
        };
        let row = HemisphereVolumes::from_prediction(name, &read_nifti(&prediction)?);
        if row.is_empty() {
            warn!("{} has an empty prediction, skipping", prediction.display());
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_volumes_csv(rows: &[HemisphereVolumes], path: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote {} subjects to {}", rows.len(), path.as_ref().display());
    Ok(())
}
