//! Bounding boxes and sub-volume extraction

use crate::affine::Affine;
use crate::error::{Result, VolumeError};
use crate::volume::Volume;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Half-open voxel index box `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub start: [usize; 3],
    pub end: [usize; 3],
}

impl BoundingBox {
    pub fn shape(&self) -> [usize; 3] {
        [
            self.end[0] - self.start[0],
            self.end[1] - self.start[1],
            self.end[2] - self.start[2],
        ]
    }

    /// Integer centre, rounded down
    pub fn centre(&self) -> [usize; 3] {
        [
            (self.start[0] + self.end[0]) / 2,
            (self.start[1] + self.end[1]) / 2,
            (self.start[2] + self.end[2]) / 2,
        ]
    }
}

/// Smallest box containing every nonzero voxel, `None` for an empty volume
pub fn nonzero_bbox(volume: &Volume) -> Option<BoundingBox> {
    let mut start = [usize::MAX; 3];
    let mut end = [0usize; 3];
    let mut found = false;
    for ((i, j, k), value) in volume.data().indexed_iter() {
        if *value != 0.0 {
            found = true;
            for (axis, index) in [i, j, k].into_iter().enumerate() {
                start[axis] = start[axis].min(index);
                end[axis] = end[axis].max(index + 1);
            }
        }
    }
    found.then_some(BoundingBox { start, end })
}

/// A voxel region that may extend past the volume on any side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: [isize; 3],
    pub shape: [usize; 3],
}

impl Region {
    /// `bbox` grown by `margin` voxels on every side
    pub fn around(bbox: &BoundingBox, margin: [usize; 3]) -> Self {
        let mut start = [0isize; 3];
        let mut shape = [0usize; 3];
        for axis in 0..3 {
            start[axis] = bbox.start[axis] as isize - margin[axis] as isize;
            shape[axis] = bbox.shape()[axis] + 2 * margin[axis];
        }
        Self { start, shape }
    }

    /// A fixed-size region centred on `bbox`
    pub fn centred(bbox: &BoundingBox, size: [usize; 3]) -> Self {
        let centre = bbox.centre();
        let mut start = [0isize; 3];
        for axis in 0..3 {
            start[axis] = centre[axis] as isize - (size[axis] / 2) as isize;
        }
        Self { start, shape: size }
    }

    pub fn contains_volume_index(&self, axis: usize, index: usize) -> bool {
        let index = index as isize;
        index >= self.start[axis] && index < self.start[axis] + self.shape[axis] as isize
    }
}

/// Copy `region` out of `volume`, zero-filling voxels outside the image
///
/// The new affine places voxel `(0, 0, 0)` at the region start, so every
/// copied voxel keeps its world position.
pub fn extract_region(volume: &Volume, region: &Region) -> Result<Volume> {
    if region.shape.iter().any(|n| *n == 0) {
        return Err(VolumeError::InvalidShape(region.shape));
    }
    let source = volume.data();
    let limits = volume.shape();
    let data = Array3::from_shape_fn(region.shape, |(i, j, k)| {
        let index = [
            region.start[0] + i as isize,
            region.start[1] + j as isize,
            region.start[2] + k as isize,
        ];
        let inside = (0..3).all(|axis| index[axis] >= 0 && (index[axis] as usize) < limits[axis]);
        if inside {
            source[[index[0] as usize, index[1] as usize, index[2] as usize]]
        } else {
            0.0
        }
    });

    let start = region.start.map(|s| s as f64);
    let origin = volume.affine().transform_point(start);
    Volume::new(data, volume.affine().with_origin(origin))
}

/// Crop to the nonzero bounding box plus `margin` voxels (c3d `-trim`)
///
/// An all-zero volume is returned unchanged.
pub fn trim(volume: &Volume, margin: [usize; 3]) -> Result<Volume> {
    match nonzero_bbox(volume) {
        Some(bbox) => extract_region(volume, &Region::around(&bbox, margin)),
        None => Ok(volume.clone()),
    }
}

/// Crop a box of exactly `size` voxels centred on the nonzero content (c3d `-trim-to-size`)
pub fn trim_to_size(volume: &Volume, size: [usize; 3]) -> Result<Volume> {
    let bbox = nonzero_bbox(volume).unwrap_or(BoundingBox {
        start: [0; 3],
        end: volume.shape(),
    });
    extract_region(volume, &Region::centred(&bbox, size))
}

/// Voxel index of `volume` containing world point `point`, if inside
pub fn world_to_index(volume: &Volume, point: [f64; 3]) -> Result<Option<[usize; 3]>> {
    let inverse: Affine = volume.affine().inverse()?;
    let position = inverse.transform_point(point);
    let shape = volume.shape();
    let mut index = [0usize; 3];
    for axis in 0..3 {
        let rounded = position[axis].round();
        if rounded < 0.0 || rounded as usize >= shape[axis] {
            return Ok(None);
        }
        index[axis] = rounded as usize;
    }
    Ok(Some(index))
}
