//! Anatomical axis codes
//!
//! Codes follow the "towards" convention: `RAS` means index 0 increases
//! towards the subject's Right, index 1 towards Anterior, index 2 towards
//! Superior. ITK-based tools (c3d, ANTs) name the same orientation by the
//! direction each axis comes *from*, so `RAS` here is `LPI` there; see
//! [`AxisCodes::to_itk`].

use crate::affine::Affine;
use crate::error::{Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisCode {
    R,
    L,
    A,
    P,
    S,
    I,
}

impl AxisCode {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(AxisCode::R),
            'L' => Some(AxisCode::L),
            'A' => Some(AxisCode::A),
            'P' => Some(AxisCode::P),
            'S' => Some(AxisCode::S),
            'I' => Some(AxisCode::I),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            AxisCode::R => 'R',
            AxisCode::L => 'L',
            AxisCode::A => 'A',
            AxisCode::P => 'P',
            AxisCode::S => 'S',
            AxisCode::I => 'I',
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            AxisCode::R => AxisCode::L,
            AxisCode::L => AxisCode::R,
            AxisCode::A => AxisCode::P,
            AxisCode::P => AxisCode::A,
            AxisCode::S => AxisCode::I,
            AxisCode::I => AxisCode::S,
        }
    }

    /// World axis this code lies on: 0 = left/right, 1 = anterior/posterior, 2 = superior/inferior
    pub fn world_axis(self) -> usize {
        match self {
            AxisCode::R | AxisCode::L => 0,
            AxisCode::A | AxisCode::P => 1,
            AxisCode::S | AxisCode::I => 2,
        }
    }

    /// Code for a positive step along world axis `world_axis` (RAS+ scanner space)
    fn positive(world_axis: usize) -> Self {
        match world_axis {
            0 => AxisCode::R,
            1 => AxisCode::A,
            _ => AxisCode::S,
        }
    }
}

/// Three-letter orientation of a voxel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisCodes([AxisCode; 3]);

impl AxisCodes {
    pub const RAS: AxisCodes = AxisCodes([AxisCode::R, AxisCode::A, AxisCode::S]);
    pub const LAS: AxisCodes = AxisCodes([AxisCode::L, AxisCode::A, AxisCode::S]);

    pub fn new(codes: [AxisCode; 3]) -> Self {
        Self(codes)
    }

    /// Orientation of an affine, assigning each voxel axis to the world axis
    /// its direction is most aligned with
    ///
    /// Assignment is greedy on the largest absolute direction cosine, so
    /// oblique grids map to their closest axis-aligned orientation.
    pub fn from_affine(affine: &Affine) -> Result<Self> {
        affine.validate()?;
        let directions = affine.directions();
        let mut codes = [AxisCode::R; 3];
        let mut voxel_used = [false; 3];
        let mut world_used = [false; 3];

        for _ in 0..3 {
            let mut best: Option<(usize, usize, f64)> = None;
            for (voxel_axis, direction) in directions.iter().enumerate() {
                if voxel_used[voxel_axis] {
                    continue;
                }
                for (world_axis, component) in direction.iter().enumerate() {
                    if world_used[world_axis] {
                        continue;
                    }
                    if best.map_or(true, |(_, _, value)| component.abs() > value.abs()) {
                        best = Some((voxel_axis, world_axis, *component));
                    }
                }
            }
            let (voxel_axis, world_axis, component) = best.ok_or_else(|| {
                VolumeError::InvalidAxisCodes("could not assign voxel axes".to_string())
            })?;
            let positive = AxisCode::positive(world_axis);
            codes[voxel_axis] = if component >= 0.0 {
                positive
            } else {
                positive.opposite()
            };
            voxel_used[voxel_axis] = true;
            world_used[world_axis] = true;
        }
        Ok(Self(codes))
    }

    /// Largest angle in degrees between a voxel axis and the world axis it was assigned
    pub fn obliquity(affine: &Affine) -> Result<f64> {
        let codes = Self::from_affine(affine)?;
        let directions = affine.directions();
        let mut worst = 0.0f64;
        for (voxel_axis, code) in codes.0.iter().enumerate() {
            let cosine = directions[voxel_axis][code.world_axis()].abs().min(1.0);
            worst = worst.max(cosine.acos().to_degrees());
        }
        Ok(worst)
    }

    pub fn codes(&self) -> [AxisCode; 3] {
        self.0
    }

    pub fn get(&self, axis: usize) -> AxisCode {
        self.0[axis]
    }

    /// Voxel axis carrying `code`, if any
    pub fn position(&self, code: AxisCode) -> Option<usize> {
        self.0.iter().position(|c| *c == code)
    }

    pub fn contains(&self, code: AxisCode) -> bool {
        self.position(code).is_some()
    }

    /// True when each world axis appears exactly once
    pub fn is_well_formed(&self) -> bool {
        let mut seen = [false; 3];
        for code in self.0 {
            if seen[code.world_axis()] {
                return false;
            }
            seen[code.world_axis()] = true;
        }
        true
    }

    /// The same orientation in ITK's "from" convention, as accepted by `c3d -orient`
    pub fn to_itk(&self) -> String {
        self.0.iter().map(|c| c.opposite().as_char()).collect()
    }

    /// Parse an ITK-convention code such as `RPI`
    pub fn from_itk(code: &str) -> Result<Self> {
        let parsed: AxisCodes = code.parse()?;
        Ok(Self(parsed.0.map(AxisCode::opposite)))
    }
}

impl fmt::Display for AxisCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in self.0 {
            write!(f, "{}", code.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for AxisCodes {
    type Err = VolumeError;

    /// Accepts any three orientation letters; use [`AxisCodes::is_well_formed`]
    /// to reject codes such as `RRS`
    fn from_str(s: &str) -> Result<Self> {
        let letters: Vec<char> = s.trim().chars().collect();
        if letters.len() != 3 {
            return Err(VolumeError::InvalidAxisCodes(s.to_string()));
        }
        let mut codes = [AxisCode::R; 3];
        for (slot, letter) in codes.iter_mut().zip(letters) {
            *slot = AxisCode::from_char(letter)
                .ok_or_else(|| VolumeError::InvalidAxisCodes(s.to_string()))?;
        }
        Ok(Self(codes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_ras() {
        let codes = AxisCodes::from_affine(&Affine::identity()).unwrap();
        assert_eq!(codes, AxisCodes::RAS);
        assert_eq!(codes.to_string(), "RAS");
    }

    #[test]
    fn test_flipped_and_permuted_axes() {
        // i -> -x, j -> -z, k -> +y : L I A
        let affine = Affine::from_columns(
            [[-1.0, 0.0, 0.0], [0.0, 0.0, -1.2], [0.0, 0.9, 0.0]],
            [0.0; 3],
        );
        let codes = AxisCodes::from_affine(&affine).unwrap();
        assert_eq!(codes.to_string(), "LIA");
        assert!(codes.is_well_formed());
        assert_eq!(codes.position(AxisCode::L), Some(0));
    }

    #[test]
    fn test_oblique_maps_to_closest() {
        let (s, c) = (20f64.to_radians().sin(), 20f64.to_radians().cos());
        let affine = Affine::from_columns(
            [[c, s, 0.0], [-s, c, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
        );
        assert_eq!(AxisCodes::from_affine(&affine).unwrap(), AxisCodes::RAS);
        let angle = AxisCodes::obliquity(&affine).unwrap();
        assert!((angle - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_itk_convention() {
        assert_eq!(AxisCodes::RAS.to_itk(), "LPI");
        assert_eq!(AxisCodes::LAS.to_itk(), "RPI");
        assert_eq!(AxisCodes::from_itk("RPI").unwrap(), AxisCodes::LAS);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("RA".parse::<AxisCodes>().is_err());
        assert!("RAX".parse::<AxisCodes>().is_err());
        let lenient: AxisCodes = "aas".parse().unwrap();
        assert!(!lenient.is_well_formed());
    }

    #[test]
    fn test_degenerate_affine_has_no_codes() {
        let flat = Affine::from_spacing([1.0, 0.0, 1.0], [0.0; 3]);
        assert!(AxisCodes::from_affine(&flat).is_err());
    }
}
