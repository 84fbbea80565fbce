//! Connected components of binary masks
//!
//! The segmentation assumes bilateral anatomy: the foreground that matters is
//! two disjoint blobs, one per hemisphere. [`largest_two`] keeps exactly those
//! and drops everything smaller, including genuine fragments of a structure.

use crate::volume::Volume;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Neighbourhood used to decide whether two foreground voxels touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Shared faces only
    Face6,
    /// Faces and edges
    Edge18,
    /// Faces, edges and corners
    #[default]
    Vertex26,
}

impl Connectivity {
    fn offsets(self) -> Vec<[isize; 3]> {
        let mut offsets = Vec::with_capacity(26);
        for di in -1isize..=1 {
            for dj in -1isize..=1 {
                for dk in -1isize..=1 {
                    let order = di.abs() + dj.abs() + dk.abs();
                    let keep = match self {
                        Connectivity::Face6 => order == 1,
                        Connectivity::Edge18 => order == 1 || order == 2,
                        Connectivity::Vertex26 => order >= 1,
                    };
                    if keep {
                        offsets.push([di, dj, dk]);
                    }
                }
            }
        }
        offsets
    }
}

/// Component labeling of a mask
#[derive(Debug, Clone)]
pub struct Components {
    /// 0 for background, `1..=sizes.len()` in first-seen scan order
    pub labels: Array3<u32>,
    /// Voxel count of each component, indexed by `label - 1`
    pub sizes: Vec<usize>,
}

impl Components {
    /// Component labels ordered by descending size, ties by first-seen order
    pub fn by_size(&self) -> Vec<u32> {
        let mut order: Vec<u32> = (1..=self.sizes.len() as u32).collect();
        order.sort_by(|a, b| {
            self.sizes[(*b - 1) as usize]
                .cmp(&self.sizes[(*a - 1) as usize])
                .then(a.cmp(b))
        });
        order
    }
}

/// Label connected nonzero regions by breadth-first flood fill
pub fn label_components(mask: &Volume, connectivity: Connectivity) -> Components {
    let data = mask.data();
    let shape = mask.shape();
    let offsets = connectivity.offsets();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for ((i, j, k), value) in data.indexed_iter() {
        if *value == 0.0 || labels[[i, j, k]] != 0 {
            continue;
        }
        let label = sizes.len() as u32 + 1;
        let mut size = 0usize;
        labels[[i, j, k]] = label;
        queue.push_back([i, j, k]);

        while let Some(voxel) = queue.pop_front() {
            size += 1;
            for offset in &offsets {
                let Some(next) = neighbour(voxel, *offset, shape) else {
                    continue;
                };
                if data[next] != 0.0 && labels[next] == 0 {
                    labels[next] = label;
                    queue.push_back(next);
                }
            }
        }
        sizes.push(size);
    }

    Components { labels, sizes }
}

fn neighbour(voxel: [usize; 3], offset: [isize; 3], shape: [usize; 3]) -> Option<[usize; 3]> {
    let mut out = [0usize; 3];
    for axis in 0..3 {
        let index = voxel[axis] as isize + offset[axis];
        if index < 0 || index >= shape[axis] as isize {
            return None;
        }
        out[axis] = index as usize;
    }
    Some(out)
}

/// Binary mask of the `n` largest components
pub fn keep_largest(mask: &Volume, n: usize, connectivity: Connectivity) -> Volume {
    let components = label_components(mask, connectivity);
    let kept: Vec<u32> = components.by_size().into_iter().take(n).collect();
    debug!(
        "{} components found, keeping sizes {:?}",
        components.sizes.len(),
        kept.iter()
            .map(|l| components.sizes[(*l - 1) as usize])
            .collect::<Vec<_>>()
    );
    let data = components
        .labels
        .mapv(|label| if label != 0 && kept.contains(&label) { 1.0 } else { 0.0 });
    mask.with_data(data).unwrap_or_else(|_| mask.clone())
}

/// Largest component of a mask
pub fn largest_component(mask: &Volume, connectivity: Connectivity) -> Volume {
    keep_largest(mask, 1, connectivity)
}

/// Union of the largest component and the largest component of what remains
///
/// Returns an empty mask for empty input, and only one component when the
/// input has only one.
pub fn largest_two(mask: &Volume, connectivity: Connectivity) -> Volume {
    keep_largest(mask, 2, connectivity)
}
