//! Hippocampus segmentation from T1-weighted MRI
//!
//! Facade over the workspace crates. Most callers want
//! [`pipeline::Orchestrator`] for a single subject or
//! [`pipeline::GroupRunner`] for a cohort.

pub use hippmapper_common as common;
pub use hippmapper_inference as inference;
pub use hippmapper_pipeline as pipeline;
pub use hippmapper_tools as tools;
pub use hippmapper_volume as volume;
