//! Left/right labeling of a bilateral mask
//!
//! Foreground voxels on the subject's left half of the lateral axis become
//! [`LEFT_LABEL`], the rest [`RIGHT_LABEL`]. The split is purely positional:
//! it cuts at the middle slice of the grid, not at the gap between blobs.

use crate::error::{Result, VolumeError};
use crate::orientation::{AxisCode, AxisCodes};
use crate::volume::Volume;
use hippmapper_common::{BACKGROUND_LABEL, LEFT_LABEL, RIGHT_LABEL};
use ndarray::Array3;
use tracing::debug;

/// Which voxel axis is lateral, and which index range is the left side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateralSplit {
    pub axis: usize,
    pub midpoint: usize,
    /// True when indices `>= midpoint` are left, false when indices `< midpoint` are
    pub left_is_far: bool,
}

impl LateralSplit {
    pub fn locate(codes: &AxisCodes, shape: [usize; 3]) -> Result<Self> {
        let (axis, left_is_far) = if let Some(axis) = codes.position(AxisCode::L) {
            (axis, true)
        } else if let Some(axis) = codes.position(AxisCode::R) {
            (axis, false)
        } else {
            return Err(VolumeError::NoLateralAxis(codes.to_string()));
        };
        Ok(Self {
            axis,
            midpoint: shape[axis] / 2,
            left_is_far,
        })
    }

    pub fn is_left(&self, index: usize) -> bool {
        (index >= self.midpoint) == self.left_is_far
    }
}

/// Split with the mask's own orientation
pub fn split_hemispheres(mask: &Volume) -> Result<Volume> {
    split_hemispheres_with(mask, &mask.axis_codes())
}

/// Split using explicitly supplied axis codes
///
/// Fails with [`VolumeError::NoLateralAxis`] when `codes` has neither an L
/// nor an R axis.
pub fn split_hemispheres_with(mask: &Volume, codes: &AxisCodes) -> Result<Volume> {
    let split = LateralSplit::locate(codes, mask.shape())?;
    debug!(
        "Hemisphere split on axis {} at index {} ({})",
        split.axis, split.midpoint, codes
    );
    let data = mask.data();
    let labeled = Array3::from_shape_fn(mask.shape(), |(i, j, k)| {
        if data[[i, j, k]] == 0.0 {
            return BACKGROUND_LABEL;
        }
        let index = [i, j, k][split.axis];
        if split.is_left(index) {
            LEFT_LABEL
        } else {
            RIGHT_LABEL
        }
    });
    mask.with_data(labeled)
}
