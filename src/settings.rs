//! # Run settings
//!
//! This module provides the configuration record describing one training or prediction run,
//! together with the per-dataset capability profile that replaces name-based special casing
//! further down the pipeline.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{Error, Result};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Image dimensions of a dataset, known only after the first split has been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FrameDims {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

/// Capability profile of a dataset.
///
/// Datasets differ in how their ground truth is encoded, not just in content. The profile
/// carries those differences as data so the loader and evaluator never have to branch on the
/// dataset name themselves.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DatasetProfile {
    /// Ground truth contains unknown pixels encoded as zero which must be excluded from the
    /// error denominator.
    pub requires_validity_mask: bool,

    /// Number of raw disparity units per pixel. `kitti2015` stores disparities at 256 units
    /// per pixel, dense synthetic sets at 1.
    pub disparity_unit_scale: f32,

    /// The network must run without internal padding for this dataset.
    pub no_padding: bool,
}

/// Settings for one run of the training/evaluation pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Dataset name, the stem of every shard and split file on disk.
    pub dataset: String,

    /// Number of training shards staged for this dataset. A count of one selects the long
    /// single-fit schedule, anything larger the phased multi-shard schedule.
    pub shard_count: u32,

    /// Pretrained weight checkpoint to load before training or prediction.
    #[serde(default)]
    pub weights: Option<PathBuf>,

    /// Prediction-only mode, evaluating the held-out complete test split.
    #[serde(default)]
    pub predict: bool,

    /// Write qualitative images for every evaluated sample instead of just the fixed one.
    #[serde(default)]
    pub generate_images: bool,

    /// Skip all weight updates and run the test-split benchmark only.
    #[serde(default)]
    pub skip_training: bool,

    /// Capability profile, derived from the dataset name unless overridden.
    #[serde(default)]
    pub profile: DatasetProfile,

    /// Frame dimensions recorded from the first loaded left-image tensor.
    #[serde(default)]
    pub dims: Option<FrameDims>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for DatasetProfile {
    fn default() -> Self {
        DatasetProfile {
            requires_validity_mask: false,
            disparity_unit_scale: 1.0,
            no_padding: false,
        }
    }
}

impl DatasetProfile {
    /// Select the profile matching a dataset name.
    pub fn for_dataset(name: &str) -> Self {
        match name {
            "kitti2015" => DatasetProfile {
                requires_validity_mask: true,
                disparity_unit_scale: 256.0,
                no_padding: true,
            },
            _ => DatasetProfile::default(),
        }
    }
}

impl Settings {
    /// Create settings for a named dataset with the profile derived from the name.
    pub fn new(dataset: &str, shard_count: u32) -> Self {
        Settings {
            dataset: String::from(dataset),
            shard_count,
            weights: None,
            predict: false,
            generate_images: false,
            skip_training: false,
            profile: DatasetProfile::for_dataset(dataset),
            dims: None,
        }
    }

    /// Check the settings for combinations that would otherwise surface much later as an
    /// uninitialised network.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count < 1 {
            return Err(Error::InconsistentSettings(String::from(
                "the shard count must be at least 1",
            )));
        }
        if self.predict && self.weights.is_none() {
            return Err(Error::InconsistentSettings(String::from(
                "prediction mode requires a weight checkpoint",
            )));
        }
        if self.skip_training && self.weights.is_none() {
            return Err(Error::InconsistentSettings(String::from(
                "skipping training requires a weight checkpoint",
            )));
        }
        Ok(())
    }

    /// Record the frame dimensions observed while loading a split.
    pub fn record_dims(&mut self, dims: FrameDims) {
        self.dims = Some(dims);
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
