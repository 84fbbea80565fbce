//! Voxel grids, resampling and mask post-processing for 3D MRI volumes
//!
//! # Example
//! ```no_run
//! use hippmapper_volume::{nifti, resample, Interpolation};
//!
//! # fn main() -> hippmapper_volume::Result<()> {
//! let t1 = nifti::read_nifti("sub01_T1_nu.nii.gz")?;
//! println!("{} {:?} {:?}", t1.axis_codes(), t1.shape(), t1.spacing());
//!
//! let coarse = resample(&t1, [160, 160, 128], Interpolation::Linear)?;
//! nifti::write_nifti("sub01_coarse.nii.gz", &coarse)?;
//! # Ok(())
//! # }
//! ```

pub mod affine;
pub mod components;
pub mod error;
pub mod hemisphere;
pub mod intensity;
pub mod nifti;
pub mod orientation;
pub mod region;
pub mod resample;
pub mod volume;

pub use affine::Affine;
pub use components::{largest_two, Connectivity};
pub use error::{Result, VolumeError};
pub use hemisphere::split_hemispheres;
pub use orientation::{AxisCode, AxisCodes};
pub use region::{BoundingBox, Region};
pub use resample::{resample, reslice_like, Interpolation};
pub use volume::{Grid, Volume};
