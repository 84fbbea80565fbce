//! Volume: voxel data on an affine grid

use crate::affine::Affine;
use crate::error::{Result, VolumeError};
use crate::orientation::AxisCodes;
use ndarray::{Array3, Axis};

/// Shape and placement of a voxel grid, without data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub shape: [usize; 3],
    pub affine: Affine,
}

impl Grid {
    pub fn new(shape: [usize; 3], affine: Affine) -> Result<Self> {
        if shape.iter().any(|n| *n == 0) {
            return Err(VolumeError::InvalidShape(shape));
        }
        affine.validate()?;
        Ok(Self { shape, affine })
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.affine.spacing()
    }

    pub fn voxel_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A 3D scalar volume
///
/// Data is indexed `[i, j, k]` matching the affine's voxel axes. Volumes are
/// never mutated in place: every operation returns a new `Volume`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    affine: Affine,
}

impl Volume {
    pub fn new(data: Array3<f32>, affine: Affine) -> Result<Self> {
        let shape = dims(&data);
        if shape.iter().any(|n| *n == 0) {
            return Err(VolumeError::InvalidShape(shape));
        }
        affine.validate()?;
        Ok(Self { data, affine })
    }

    pub fn zeros(grid: &Grid) -> Self {
        Self {
            data: Array3::zeros(grid.shape),
            affine: grid.affine,
        }
    }

    /// New volume on this volume's grid
    pub fn with_data(&self, data: Array3<f32>) -> Result<Self> {
        let actual = dims(&data);
        if actual != self.shape() {
            return Err(VolumeError::ShapeMismatch {
                expected: self.shape(),
                actual,
            });
        }
        Ok(Self {
            data,
            affine: self.affine,
        })
    }

    /// Apply `f` to every voxel, keeping the grid
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32,
    {
        Self {
            data: self.data.mapv(f),
            affine: self.affine,
        }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn shape(&self) -> [usize; 3] {
        dims(&self.data)
    }

    pub fn grid(&self) -> Grid {
        Grid {
            shape: self.shape(),
            affine: self.affine,
        }
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.affine.spacing()
    }

    /// Physical volume of one voxel in cubic millimetres
    pub fn voxel_volume(&self) -> f64 {
        self.affine.determinant().abs()
    }

    /// Infallible: the affine was validated at construction
    pub fn axis_codes(&self) -> AxisCodes {
        AxisCodes::from_affine(&self.affine).unwrap_or(AxisCodes::RAS)
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    pub fn count_equal(&self, value: f32) -> usize {
        self.data.iter().filter(|v| **v == value).count()
    }

    /// Permute and flip voxel axes so the grid has orientation `target`
    ///
    /// Only axis order and direction change: voxel values are copied, never
    /// interpolated, and every voxel keeps its world position.
    pub fn reorient(&self, target: AxisCodes) -> Result<Volume> {
        if !target.is_well_formed() {
            return Err(VolumeError::InvalidAxisCodes(target.to_string()));
        }
        let source = self.axis_codes();
        if source == target {
            return Ok(self.clone());
        }

        let shape = self.shape();
        let mut permutation = [0usize; 3];
        let mut flips = [false; 3];
        for (target_axis, code) in target.codes().iter().enumerate() {
            let source_axis = source
                .codes()
                .iter()
                .position(|c| c.world_axis() == code.world_axis())
                .ok_or_else(|| VolumeError::InvalidAxisCodes(source.to_string()))?;
            permutation[target_axis] = source_axis;
            flips[target_axis] = source.get(source_axis) != *code;
        }

        let mut view = self.data.view().permuted_axes(permutation);
        let mut columns = [[0.0; 3]; 3];
        let mut origin = self.affine.origin();
        for target_axis in 0..3 {
            let source_axis = permutation[target_axis];
            let column = self.affine.column(source_axis);
            if flips[target_axis] {
                view.invert_axis(Axis(target_axis));
                let last = (shape[source_axis] - 1) as f64;
                for row in 0..3 {
                    origin[row] += column[row] * last;
                    columns[target_axis][row] = -column[row];
                }
            } else {
                columns[target_axis] = column;
            }
        }

        Volume::new(
            view.as_standard_layout().into_owned(),
            Affine::from_columns(columns, origin),
        )
    }

    /// Reorient to RAS
    pub fn to_canonical(&self) -> Result<Volume> {
        self.reorient(AxisCodes::RAS)
    }
}

pub(crate) fn dims(data: &Array3<f32>) -> [usize; 3] {
    let (x, y, z) = data.dim();
    [x, y, z]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: [usize; 3]) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(i, j, k)| (i * 100 + j * 10 + k) as f32)
    }

    #[test]
    fn test_rejects_empty_and_degenerate() {
        assert!(matches!(
            Volume::new(Array3::zeros((0, 2, 2)), Affine::identity()),
            Err(VolumeError::InvalidShape(_))
        ));
        let flat = Affine::from_spacing([1.0, 1.0, 0.0], [0.0; 3]);
        assert!(Volume::new(Array3::zeros((2, 2, 2)), flat).is_err());
    }

    #[test]
    fn test_reorient_preserves_world_positions() {
        // L I A grid
        let affine = Affine::from_columns(
            [[-2.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.5, 0.0]],
            [10.0, -4.0, 7.0],
        );
        let volume = Volume::new(ramp([4, 3, 5]), affine).unwrap();
        let canonical = volume.to_canonical().unwrap();
        assert_eq!(canonical.axis_codes(), AxisCodes::RAS);
        assert_eq!(canonical.shape(), [4, 5, 3]);

        let inverse = canonical.affine().inverse().unwrap();
        for ((i, j, k), value) in volume.data().indexed_iter() {
            let world = affine.transform_point([i as f64, j as f64, k as f64]);
            let index = inverse.transform_point(world);
            let rounded = index.map(|v| v.round() as usize);
            for axis in 0..3 {
                assert!((index[axis] - rounded[axis] as f64).abs() < 1e-9);
            }
            assert_eq!(canonical.data()[rounded], *value);
        }
    }

    #[test]
    fn test_reorient_round_trip() {
        let volume = Volume::new(ramp([3, 4, 2]), Affine::identity()).unwrap();
        let las = volume.reorient(AxisCodes::LAS).unwrap();
        assert_eq!(las.axis_codes(), AxisCodes::LAS);
        let back = las.to_canonical().unwrap();
        assert_eq!(back.data(), volume.data());
        assert!(back.affine().max_abs_diff(volume.affine()) < 1e-12);
    }

    #[test]
    fn test_voxel_volume_and_counts() {
        let mut data = Array3::zeros((2, 2, 2));
        data[[0, 0, 0]] = 1.0;
        data[[1, 1, 1]] = 2.0;
        let volume = Volume::new(data, Affine::from_spacing([1.0, 2.0, 0.5], [0.0; 3])).unwrap();
        assert_eq!(volume.voxel_volume(), 1.0);
        assert_eq!(volume.count_nonzero(), 2);
        assert_eq!(volume.count_equal(2.0), 1);
    }
}
