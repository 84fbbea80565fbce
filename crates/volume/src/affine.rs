//! Voxel-to-world affine transforms
//!
//! An [`Affine`] maps voxel indices `(i, j, k)` to scanner coordinates in
//! millimetres. Column `a` of the linear part is the world-space step taken
//! when index `a` increases by one, so its norm is the voxel spacing along
//! that axis.

use crate::error::{Result, VolumeError};
use serde::{Deserialize, Serialize};

/// Below this magnitude a determinant is treated as singular
pub const DEGENERACY_EPSILON: f64 = 1e-12;

/// 4x4 homogeneous voxel-to-world transform, row-major
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    matrix: [[f64; 4]; 4],
}

impl Affine {
    pub fn new(matrix: [[f64; 4]; 4]) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::from_spacing([1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }

    /// Axis-aligned transform with the given voxel size and origin
    pub fn from_spacing(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        let mut columns = [[0.0; 3]; 3];
        for axis in 0..3 {
            columns[axis][axis] = spacing[axis];
        }
        Self::from_columns(columns, origin)
    }

    /// Build from the three world-space step vectors and the origin
    pub fn from_columns(columns: [[f64; 3]; 3], origin: [f64; 3]) -> Self {
        let mut matrix = [[0.0; 4]; 4];
        for row in 0..3 {
            for (axis, column) in columns.iter().enumerate() {
                matrix[row][axis] = column[row];
            }
            matrix[row][3] = origin[row];
        }
        matrix[3][3] = 1.0;
        Self { matrix }
    }

    pub fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.matrix
    }

    /// World-space step vector of voxel axis `axis`
    pub fn column(&self, axis: usize) -> [f64; 3] {
        [
            self.matrix[0][axis],
            self.matrix[1][axis],
            self.matrix[2][axis],
        ]
    }

    pub fn columns(&self) -> [[f64; 3]; 3] {
        [self.column(0), self.column(1), self.column(2)]
    }

    /// World coordinate of voxel `(0, 0, 0)`
    pub fn origin(&self) -> [f64; 3] {
        [self.matrix[0][3], self.matrix[1][3], self.matrix[2][3]]
    }

    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        for (row, value) in origin.iter().enumerate() {
            self.matrix[row][3] = *value;
        }
        self
    }

    /// Voxel size along each axis, from the column norms
    pub fn spacing(&self) -> [f64; 3] {
        let mut spacing = [0.0; 3];
        for (axis, value) in spacing.iter_mut().enumerate() {
            *value = norm(self.column(axis));
        }
        spacing
    }

    /// Unit direction of each voxel axis in world space
    ///
    /// Zero-length columns are returned unchanged.
    pub fn directions(&self) -> [[f64; 3]; 3] {
        let mut directions = self.columns();
        for direction in directions.iter_mut() {
            let length = norm(*direction);
            if length > 0.0 {
                for component in direction.iter_mut() {
                    *component /= length;
                }
            }
        }
        directions
    }

    /// Determinant of the 3x3 linear part
    pub fn determinant(&self) -> f64 {
        let m = &self.matrix;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    pub fn is_degenerate(&self) -> bool {
        !self.determinant().is_finite() || self.determinant().abs() < DEGENERACY_EPSILON
    }

    /// Fails with [`VolumeError::DegenerateAffine`] when the transform cannot be inverted
    pub fn validate(&self) -> Result<()> {
        if self.is_degenerate() {
            return Err(VolumeError::DegenerateAffine(self.determinant()));
        }
        let spacing = self.spacing();
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(VolumeError::InvalidSpacing(spacing));
        }
        Ok(())
    }

    pub fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = m[row][0] * point[0] + m[row][1] * point[1] + m[row][2] * point[2] + m[row][3];
        }
        out
    }

    /// `self * other`: apply `other` first, then `self`
    pub fn compose(&self, other: &Affine) -> Affine {
        let mut matrix = [[0.0; 4]; 4];
        for (row, out_row) in matrix.iter_mut().enumerate() {
            for (col, value) in out_row.iter_mut().enumerate() {
                *value = (0..4)
                    .map(|k| self.matrix[row][k] * other.matrix[k][col])
                    .sum();
            }
        }
        Affine { matrix }
    }

    pub fn inverse(&self) -> Result<Affine> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < DEGENERACY_EPSILON {
            return Err(VolumeError::DegenerateAffine(det));
        }
        let m = &self.matrix;
        let mut inv = [[0.0; 4]; 4];

        // Adjugate of the linear part
        inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det;
        inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det;
        inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det;
        inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det;
        inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det;
        inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det;
        inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det;
        inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det;
        inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det;

        for row in 0..3 {
            inv[row][3] = -(0..3).map(|k| inv[row][k] * m[k][3]).sum::<f64>();
        }
        inv[3][3] = 1.0;
        Ok(Affine { matrix: inv })
    }

    /// Largest elementwise difference, for approximate comparisons
    pub fn max_abs_diff(&self, other: &Affine) -> f64 {
        let mut max = 0.0f64;
        for row in 0..4 {
            for col in 0..4 {
                max = max.max((self.matrix[row][col] - other.matrix[row][col]).abs());
            }
        }
        max
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

pub(crate) fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotated() -> Affine {
        // 30 degrees about z, anisotropic voxels, shifted origin
        let (s, c) = (30f64.to_radians().sin(), 30f64.to_radians().cos());
        Affine::from_columns(
            [[0.9 * c, 0.9 * s, 0.0], [-1.1 * s, 1.1 * c, 0.0], [0.0, 0.0, 2.5]],
            [-90.0, 126.0, -72.0],
        )
    }

    #[test]
    fn test_spacing_from_column_norms() {
        let spacing = rotated().spacing();
        assert!((spacing[0] - 0.9).abs() < 1e-12);
        assert!((spacing[1] - 1.1).abs() < 1e-12);
        assert!((spacing[2] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_round_trips_points() {
        let affine = rotated();
        let inverse = affine.inverse().unwrap();
        let point = [12.0, -3.5, 40.25];
        let back = inverse.transform_point(affine.transform_point(point));
        for axis in 0..3 {
            assert!((back[axis] - point[axis]).abs() < 1e-9);
        }
        assert!(affine.compose(&inverse).max_abs_diff(&Affine::identity()) < 1e-12);
    }

    #[test]
    fn test_degenerate_affine_rejected() {
        let flat = Affine::from_columns(
            [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
        );
        assert!(flat.is_degenerate());
        assert!(matches!(
            flat.validate(),
            Err(VolumeError::DegenerateAffine(_))
        ));
        assert!(flat.inverse().is_err());
    }

    #[test]
    fn test_from_spacing_layout() {
        let affine = Affine::from_spacing([2.0, 3.0, 4.0], [1.0, 2.0, 3.0]);
        assert_eq!(affine.transform_point([1.0, 1.0, 1.0]), [3.0, 5.0, 7.0]);
        assert_eq!(affine.origin(), [1.0, 2.0, 3.0]);
        assert_eq!(affine.determinant(), 24.0);
    }
}
