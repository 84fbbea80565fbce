//! External collaborators of the segmentation pipeline
//!
//! Bias correction, thresholding, local contrast normalization,
//! reorientation, cropping and QC rendering are defined as async traits in
//! [`traits`]. [`external`] implements them by running the c3d, ANTs and FSL
//! executables, [`native`] and [`mosaic`] implement them in-process.

pub mod command;
pub mod error;
pub mod external;
pub mod mosaic;
pub mod native;
pub mod paths;
pub mod traits;

pub use command::{ToolCommand, ToolOutput, DEFAULT_TOOL_TIMEOUT};
pub use error::{Result, ToolError};
pub use external::{AntsMosaic, C3dTool, FslThreshold, N4Corrector};
pub use mosaic::NativeMosaic;
pub use native::NativeTools;
pub use paths::ToolPaths;
pub use traits::{
    BiasFieldCorrector, BiasFieldParams, CropTool, LocalContrastNormalizer, MosaicParams,
    MosaicRenderer, OrientationProbe, ProbedOrientation, ReorientTool, RobustThreshold,
};
