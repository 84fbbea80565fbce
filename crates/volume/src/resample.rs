//! Resampling onto new grids
//!
//! [`resample`] changes the number of voxels while keeping the field of view,
//! [`reslice_like`] samples a volume on another volume's exact grid.
//!
//! Both treat voxel values as samples at voxel centres. Positions that fall
//! between samples are reconstructed with the requested [`Interpolation`].

use crate::affine::Affine;
use crate::error::{Result, VolumeError};
use crate::volume::{dims, Grid, Volume};
use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reconstruction kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Order 0; use for label volumes
    Nearest,
    /// Order 1
    #[default]
    Linear,
    /// Order 3 (Catmull-Rom); keeps intensity detail when cropping structurals
    Cubic,
}

impl Interpolation {
    /// Spline order, as used by c3d's `-interpolation` flag
    pub fn order(self) -> u8 {
        match self {
            Interpolation::Nearest => 0,
            Interpolation::Linear => 1,
            Interpolation::Cubic => 3,
        }
    }

    pub fn from_order(order: u8) -> Option<Self> {
        match order {
            0 => Some(Interpolation::Nearest),
            1 => Some(Interpolation::Linear),
            3 => Some(Interpolation::Cubic),
            _ => None,
        }
    }
}

/// Sample positions and weights along one axis
#[derive(Debug, Clone, Copy)]
struct Taps {
    index: [usize; 4],
    weight: [f32; 4],
    len: usize,
}

impl Taps {
    /// Taps reconstructing position `x` on an axis of `n` samples, clamping to the edge
    fn at(x: f64, n: usize, interpolation: Interpolation) -> Self {
        let last = n as isize - 1;
        let clamp = |i: isize| i.clamp(0, last) as usize;
        let mut taps = Taps {
            index: [0; 4],
            weight: [0.0; 4],
            len: 0,
        };
        match interpolation {
            Interpolation::Nearest => {
                taps.index[0] = clamp((x + 0.5).floor() as isize);
                taps.weight[0] = 1.0;
                taps.len = 1;
            }
            Interpolation::Linear => {
                let x = x.clamp(0.0, last as f64);
                let base = x.floor();
                let frac = x - base;
                taps.index[0] = clamp(base as isize);
                taps.weight[0] = (1.0 - frac) as f32;
                taps.len = 1;
                if frac > 0.0 {
                    taps.index[1] = clamp(base as isize + 1);
                    taps.weight[1] = frac as f32;
                    taps.len = 2;
                }
            }
            Interpolation::Cubic => {
                let base = x.floor();
                let frac = x - base;
                if frac == 0.0 {
                    taps.index[0] = clamp(base as isize);
                    taps.weight[0] = 1.0;
                    taps.len = 1;
                } else {
                    for (slot, offset) in (-1isize..=2).enumerate() {
                        taps.index[slot] = clamp(base as isize + offset);
                        taps.weight[slot] = catmull_rom(frac - offset as f64) as f32;
                    }
                    taps.len = 4;
                }
            }
        }
        taps
    }

    #[inline]
    fn apply(&self, lane: &ArrayView1<f32>) -> f32 {
        (0..self.len)
            .map(|t| lane[self.index[t]] * self.weight[t])
            .sum()
    }
}

/// Keys cubic kernel with a = -0.5
fn catmull_rom(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        1.5 * t * t * t - 2.5 * t * t + 1.0
    } else if t < 2.0 {
        -0.5 * t * t * t + 2.5 * t * t - 4.0 * t + 2.0
    } else {
        0.0
    }
}

/// Resample along a single axis to `out_len` samples spanning the same extent
fn resample_axis(
    data: &Array3<f32>,
    axis: usize,
    out_len: usize,
    interpolation: Interpolation,
) -> Array3<f32> {
    let mut shape = dims(data);
    let in_len = shape[axis];
    if in_len == out_len {
        return data.clone();
    }
    let scale = in_len as f64 / out_len as f64;
    let taps: Vec<Taps> = (0..out_len)
        .map(|i| Taps::at((i as f64 + 0.5) * scale - 0.5, in_len, interpolation))
        .collect();

    shape[axis] = out_len;
    let mut out = Array3::zeros(shape);
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(data.lanes(Axis(axis)))
        .for_each(|mut out_lane: ArrayViewMut1<f32>, in_lane| {
            for (value, tap) in out_lane.iter_mut().zip(&taps) {
                *value = tap.apply(&in_lane);
            }
        });
    out
}

/// Resample `volume` to `target_shape` voxels over the same field of view
///
/// The volume is first reoriented to RAS so zoom factors are computed per
/// anatomical axis. With `zoom = target / current` per axis the new spacing is
/// `spacing / zoom`; direction vectors are rescaled to it and the origin moves
/// by half the spacing change so voxel centres, not corners, stay aligned.
pub fn resample(
    volume: &Volume,
    target_shape: [usize; 3],
    interpolation: Interpolation,
) -> Result<Volume> {
    if target_shape.iter().any(|n| *n == 0) {
        return Err(VolumeError::InvalidShape(target_shape));
    }
    let canonical = volume.to_canonical()?;
    let shape = canonical.shape();
    let spacing = canonical.spacing();
    let directions = canonical.affine().directions();

    let mut new_spacing = [0.0; 3];
    for axis in 0..3 {
        let zoom = target_shape[axis] as f64 / shape[axis] as f64;
        new_spacing[axis] = spacing[axis] / zoom;
    }
    debug!(
        "Resampling {:?} -> {:?} ({:?}), spacing {:?} -> {:?}",
        shape, target_shape, interpolation, spacing, new_spacing
    );

    let mut columns = [[0.0; 3]; 3];
    let mut origin = canonical.affine().origin();
    for axis in 0..3 {
        let shift = (new_spacing[axis] - spacing[axis]) / 2.0;
        for row in 0..3 {
            columns[axis][row] = directions[axis][row] * new_spacing[axis];
            origin[row] += directions[axis][row] * shift;
        }
    }

    let mut data = canonical.into_data();
    for axis in 0..3 {
        data = resample_axis(&data, axis, target_shape[axis], interpolation);
    }
    Volume::new(data, Affine::from_columns(columns, origin))
}

/// Tolerance for treating a sample position as inside the source grid
const EDGE_TOLERANCE: f64 = 1e-6;

/// Sample `source` on `grid`, mapping through world coordinates
///
/// Grid voxels whose centre falls outside the source field of view are set
/// to zero.
pub fn reslice_like(source: &Volume, grid: &Grid, interpolation: Interpolation) -> Result<Volume> {
    let to_source = source.affine().inverse()?.compose(&grid.affine);
    let source_shape = source.shape();
    let data = source.data();
    let [nx, ny, nz] = grid.shape;
    let m = to_source.matrix();

    let mut values = vec![0.0f32; grid.voxel_count()];
    values
        .par_chunks_mut(ny * nz)
        .enumerate()
        .for_each(|(i, plane)| {
            for j in 0..ny {
                for k in 0..nz {
                    let ijk = [i as f64, j as f64, k as f64];
                    let mut position = [0.0; 3];
                    let mut inside = true;
                    for axis in 0..3 {
                        let x = m[axis][0] * ijk[0] + m[axis][1] * ijk[1] + m[axis][2] * ijk[2]
                            + m[axis][3];
                        let upper = source_shape[axis] as f64 - 0.5;
                        if x < -0.5 - EDGE_TOLERANCE || x > upper + EDGE_TOLERANCE {
                            inside = false;
                            break;
                        }
                        position[axis] = x;
                    }
                    if inside {
                        plane[j * nz + k] = sample(data, position, source_shape, interpolation);
                    }
                }
            }
        });

    let data = Array3::from_shape_vec((nx, ny, nz), values)?;
    Volume::new(data, grid.affine)
}

fn sample(
    data: &Array3<f32>,
    position: [f64; 3],
    shape: [usize; 3],
    interpolation: Interpolation,
) -> f32 {
    let tx = Taps::at(position[0], shape[0], interpolation);
    let ty = Taps::at(position[1], shape[1], interpolation);
    let tz = Taps::at(position[2], shape[2], interpolation);
    let mut total = 0.0f32;
    for a in 0..tx.len {
        for b in 0..ty.len {
            let wab = tx.weight[a] * ty.weight[b];
            for c in 0..tz.len {
                total += data[[tx.index[a], ty.index[b], tz.index[c]]] * wab * tz.weight[c];
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::AxisCodes;

    fn labels(shape: [usize; 3]) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(i, j, k)| ((i * 7 + j * 3 + k) % 4) as f32)
    }

    fn smooth(shape: [usize; 3]) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(i, j, k)| {
            let (x, y, z) = (i as f32 / 8.0, j as f32 / 8.0, k as f32 / 8.0);
            x.sin() + y.cos() + 0.5 * z
        })
    }

    fn affine() -> Affine {
        Affine::from_spacing([1.2, 1.0, 2.0], [-30.0, 12.0, 5.5])
    }

    #[test]
    fn test_identity_resample_is_exact() {
        let volume = Volume::new(labels([9, 7, 5]), affine()).unwrap();
        for interpolation in [
            Interpolation::Nearest,
            Interpolation::Linear,
            Interpolation::Cubic,
        ] {
            let out = resample(&volume, volume.shape(), interpolation).unwrap();
            assert_eq!(out.data(), volume.data());
            assert!(out.affine().max_abs_diff(volume.affine()) < 1e-12);
        }
    }

    #[test]
    fn test_spacing_and_centre_alignment() {
        let volume = Volume::new(smooth([20, 10, 8]), affine()).unwrap();
        let out = resample(&volume, [10, 20, 8], Interpolation::Linear).unwrap();
        let spacing = out.spacing();
        assert!((spacing[0] - 2.4).abs() < 1e-12);
        assert!((spacing[1] - 0.5).abs() < 1e-12);
        assert!((spacing[2] - 2.0).abs() < 1e-12);

        // Field of view corners coincide
        let corner_in = volume.affine().transform_point([-0.5, -0.5, -0.5]);
        let corner_out = out.affine().transform_point([-0.5, -0.5, -0.5]);
        for axis in 0..3 {
            assert!((corner_in[axis] - corner_out[axis]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_nearest_round_trip_integer_zoom() {
        let volume = Volume::new(labels([6, 5, 4]), affine()).unwrap();
        let up = resample(&volume, [12, 10, 8], Interpolation::Nearest).unwrap();
        let down = resample(&up, volume.shape(), Interpolation::Nearest).unwrap();
        assert_eq!(down.data(), volume.data());
    }

    #[test]
    fn test_linear_round_trip_bounded_error() {
        let volume = Volume::new(smooth([16, 16, 16]), affine()).unwrap();
        let up = resample(&volume, [32, 24, 20], Interpolation::Linear).unwrap();
        let down = resample(&up, volume.shape(), Interpolation::Linear).unwrap();
        let max_error = Zip::from(down.data())
            .and(volume.data())
            .fold(0.0f32, |acc, a, b| acc.max((a - b).abs()));
        assert!(max_error < 0.05, "max round-trip error {}", max_error);
    }

    #[test]
    fn test_resample_canonicalizes_first() {
        let las = Volume::new(labels([6, 4, 4]), affine())
            .unwrap()
            .reorient(AxisCodes::LAS)
            .unwrap();
        let out = resample(&las, [6, 4, 4], Interpolation::Nearest).unwrap();
        assert_eq!(out.axis_codes(), AxisCodes::RAS);
        assert_eq!(out.data(), las.to_canonical().unwrap().data());
    }

    #[test]
    fn test_reslice_onto_same_grid_is_identity() {
        let volume = Volume::new(smooth([8, 6, 5]), affine()).unwrap();
        for interpolation in [Interpolation::Nearest, Interpolation::Linear, Interpolation::Cubic] {
            let out = reslice_like(&volume, &volume.grid(), interpolation).unwrap();
            assert_eq!(out.data(), volume.data());
        }
    }

    #[test]
    fn test_reslice_translated_grid_pads_outside() {
        let volume = Volume::new(labels([6, 6, 6]), Affine::identity()).unwrap();
        let shifted =
            Grid::new([6, 6, 6], Affine::identity().with_origin([3.0, 0.0, 0.0])).unwrap();
        let out = reslice_like(&volume, &shifted, Interpolation::Nearest).unwrap();
        for ((i, j, k), value) in out.data().indexed_iter() {
            if i + 3 < 6 {
                assert_eq!(*value, volume.data()[[i + 3, j, k]]);
            } else {
                assert_eq!(*value, 0.0);
            }
        }
    }

    #[test]
    fn test_zero_target_shape_rejected() {
        let volume = Volume::new(labels([4, 4, 4]), affine()).unwrap();
        assert!(matches!(
            resample(&volume, [4, 0, 4], Interpolation::Linear),
            Err(VolumeError::InvalidShape(_))
        ));
    }
}
