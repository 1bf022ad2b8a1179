//! # DenseMapNet Training & Evaluation
//!
//! This crate provides the data loading, training schedule and end-point-error benchmarking
//! around a dense stereo disparity estimation network. The network itself plugs in behind the
//! [`model::DisparityNetwork`] trait.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod baseline;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod images;
pub mod model;
pub mod settings;
pub mod train;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub mod prelude {
    pub use crate::dataset::{DatasetLoader, DisparityRange, SplitData};
    pub use crate::error::{Error, Result};
    pub use crate::evaluate::{Evaluation, Evaluator, SplitKind};
    pub use crate::model::{CheckpointWriter, DisparityNetwork, EpochCallback, FitOptions};
    pub use crate::settings::{DatasetProfile, FrameDims, Settings};
    pub use crate::train::{CompileState, Trainer};
}
