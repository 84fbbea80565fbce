//! Voxelwise intensity operations

use crate::volume::{dims, Volume};
use ndarray::{Array3, Axis, Zip};
use tracing::debug;

/// Binary mask of voxels strictly above `cutoff`
pub fn binarize(volume: &Volume, cutoff: f32) -> Volume {
    volume.map(|v| if v > cutoff { 1.0 } else { 0.0 })
}

/// Linear-interpolated percentile of `values`, `pct` in [0, 100]
///
/// Sorts in place. Returns `None` for an empty slice.
pub fn percentile(values: &mut [f32], pct: f64) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    let frac = (rank - low as f64) as f32;
    Some(values[low] + (values[high] - values[low]) * frac)
}

/// 2nd and 98th percentiles of the nonzero voxels (`fslstats -r`)
pub fn robust_range(volume: &Volume) -> Option<(f32, f32)> {
    let mut values: Vec<f32> = volume
        .data()
        .iter()
        .copied()
        .filter(|v| *v != 0.0 && v.is_finite())
        .collect();
    let low = percentile(&mut values, 2.0)?;
    let high = percentile(&mut values, 98.0)?;
    Some((low, high))
}

/// Zero every voxel below `pct` percent of the robust range (`fslmaths -thrP`)
pub fn robust_range_threshold(volume: &Volume, pct: f32) -> Volume {
    match robust_range(volume) {
        Some((low, high)) => {
            let cutoff = low + (pct / 100.0) * (high - low);
            debug!(
                "Robust range [{:.3}, {:.3}], thresholding below {:.3}",
                low, high, cutoff
            );
            volume.map(|v| if v < cutoff { 0.0 } else { v })
        }
        None => volume.clone(),
    }
}

/// Zero-mean, unit-variance standardization over all voxels
///
/// A constant volume becomes all zeros.
pub fn standardize(volume: &Volume) -> Volume {
    let n = volume.data().len() as f64;
    let mean = volume.data().iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = volume
        .data()
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return volume.map(|_| 0.0);
    }
    volume.map(|v| ((v as f64 - mean) / std) as f32)
}

/// Sum over a `(2r + 1)` box along one axis, truncated at the edges
fn box_sum_axis(data: &Array3<f64>, axis: usize, radius: usize) -> Array3<f64> {
    let mut out = Array3::zeros(dims_f64(data));
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(data.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            let n = in_lane.len();
            let mut prefix = vec![0.0f64; n + 1];
            for (i, value) in in_lane.iter().enumerate() {
                prefix[i + 1] = prefix[i] + value;
            }
            for (i, value) in out_lane.iter_mut().enumerate() {
                let low = i.saturating_sub(radius);
                let high = (i + radius + 1).min(n);
                *value = prefix[high] - prefix[low];
            }
        });
    out
}

fn box_sum(data: Array3<f64>, radius: [usize; 3]) -> Array3<f64> {
    let mut data = data;
    for (axis, r) in radius.iter().enumerate() {
        data = box_sum_axis(&data, axis, *r);
    }
    data
}

fn dims_f64(data: &Array3<f64>) -> [usize; 3] {
    let (x, y, z) = data.dim();
    [x, y, z]
}

/// Masked local-window normalization (c3d `-nlw`)
///
/// The mask is the nonzero support of `volume`. Each masked voxel has the
/// mean of the masked voxels within `radius` subtracted and is divided by
/// their standard deviation; unmasked voxels and undefined results are 0.
pub fn local_window_normalize(volume: &Volume, radius: [usize; 3]) -> Volume {
    let data = volume.data();
    let mask = data.mapv(|v| if v != 0.0 { 1.0f64 } else { 0.0 });
    let weighted = data.mapv(|v| v as f64);
    let squared = data.mapv(|v| (v as f64) * (v as f64));

    let count = box_sum(mask, radius);
    let sum = box_sum(weighted, radius);
    let sum_sq = box_sum(squared, radius);

    let mut out = Array3::<f32>::zeros(dims(data));
    Zip::from(&mut out)
        .and(data)
        .and(&count)
        .and(&sum)
        .and(&sum_sq)
        .for_each(|o, &v, &n, &s, &s2| {
            if v == 0.0 || n == 0.0 {
                return;
            }
            let mean = s / n;
            let std = (s2 / n - mean * mean).max(0.0).sqrt();
            let value = (v as f64 - mean) / std;
            *o = if value.is_finite() { value as f32 } else { 0.0 };
        });
    // The grid is unchanged, so the shape always matches
    volume.with_data(out).unwrap_or_else(|_| volume.clone())
}

/// Radius for [`local_window_normalize`]: each dimension divided by `divisor`
pub fn local_window_radius(shape: [usize; 3], divisor: f64) -> [usize; 3] {
    shape.map(|n| ((n as f64) / divisor) as usize)
}

/// Binary entropy in nats of a Bernoulli probability
pub fn binary_entropy_value(p: f32) -> f32 {
    const EPS: f32 = 1e-7;
    let p = p.clamp(EPS, 1.0 - EPS);
    -(p * p.ln() + (1.0 - p) * (1.0 - p).ln())
}

/// Per-voxel binary entropy of a probability map
pub fn binary_entropy(probability: &Volume) -> Volume {
    probability.map(binary_entropy_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;

    fn volume(data: Array3<f32>) -> Volume {
        Volume::new(data, Affine::identity()).unwrap()
    }

    #[test]
    fn test_percentile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut values, 0.0), Some(1.0));
        assert_eq!(percentile(&mut values, 50.0), Some(3.0));
        assert_eq!(percentile(&mut values, 100.0), Some(5.0));
        assert_eq!(percentile(&mut values, 12.5), Some(1.5));
        assert_eq!(percentile(&mut [], 50.0), None);
    }

    #[test]
    fn test_robust_range_threshold_ignores_zeros() {
        let data = Array3::from_shape_fn((10, 10, 1), |(i, j, _)| (i * 10 + j) as f32);
        let out = robust_range_threshold(&volume(data), 10.0);
        // nonzero values 1..=99, robust range ~[2.96, 97.04], cutoff ~12.37
        assert_eq!(out.data()[[1, 2, 0]], 0.0);
        assert_eq!(out.data()[[1, 3, 0]], 13.0);
        assert_eq!(out.data()[[9, 9, 0]], 99.0);
    }

    #[test]
    fn test_standardize() {
        let data = Array3::from_shape_fn((4, 4, 4), |(i, j, k)| (i + 2 * j + 3 * k) as f32);
        let out = standardize(&volume(data));
        let n = out.data().len() as f32;
        let mean = out.data().sum() / n;
        let var = out.data().iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-4);

        let constant = standardize(&volume(Array3::from_elem((2, 2, 2), 7.0)));
        assert_eq!(constant.count_nonzero(), 0);
    }

    #[test]
    fn test_local_window_normalize_masks_background() {
        let mut data = Array3::zeros((8, 8, 8));
        for ((i, _, _), value) in data.indexed_iter_mut() {
            if i >= 2 {
                *value = 10.0 + i as f32;
            }
        }
        let out = local_window_normalize(&volume(data.clone()), [2, 2, 2]);
        for ((i, j, k), value) in out.data().indexed_iter() {
            if data[[i, j, k]] == 0.0 {
                assert_eq!(*value, 0.0);
            }
            assert!(value.is_finite());
        }
        // Interior voxel with a symmetric neighbourhood along i is centred
        assert!(out.data()[[5, 4, 4]].abs() < 1e-5);
        assert!(out.data()[[7, 4, 4]] > 0.0);
    }

    #[test]
    fn test_box_sum_truncates_at_edges() {
        let ones = Array3::from_elem((5, 1, 1), 1.0f64);
        let out = box_sum(ones, [1, 0, 0]);
        let sums: Vec<f64> = out.iter().copied().collect();
        assert_eq!(sums, vec![2.0, 3.0, 3.0, 3.0, 2.0]);
    }

    #[test]
    fn test_local_window_radius() {
        assert_eq!(local_window_radius([256, 256, 176], 2.2), [116, 116, 80]);
    }

    #[test]
    fn test_binary_entropy_peaks_at_half() {
        let data = Array3::from_shape_vec((3, 1, 1), vec![0.0, 0.5, 1.0]).unwrap();
        let entropy = binary_entropy(&volume(data));
        assert!(entropy.data()[[0, 0, 0]] < 1e-5);
        assert!((entropy.data()[[1, 0, 0]] - std::f32::consts::LN_2).abs() < 1e-6);
        assert!(entropy.data()[[2, 0, 0]] < 1e-5);
    }
}
