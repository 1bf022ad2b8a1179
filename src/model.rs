//! # Network facade
//!
//! The dense disparity network itself is an external collaborator built on whatever inference
//! backend the deployment uses. This module defines the trait it is driven through, the options
//! a single fit call takes, and the epoch-end callback plumbing the training schedule hangs
//! checkpointing and evaluation off.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use ndarray::{Array4, ArrayView4};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Options forwarded to a single [`DisparityNetwork::fit`] invocation.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Number of passes over the resident shard.
    pub epochs: usize,

    /// Mini-batch size.
    pub batch_size: usize,

    /// Shuffle samples between epochs.
    pub shuffle: bool,
}

/// Writes a weight checkpoint after every epoch, unconditionally.
///
/// Filenames encode the dataset name and the 1-based, zero-padded epoch number so the whole
/// training trajectory stays recoverable. Nothing is filtered or deleted.
pub struct CheckpointWriter {
    dir: PathBuf,
    dataset: String,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Contract between the training/evaluation machinery and the predictive network.
///
/// Construction is implementation specific and happens once, explicitly, in the driver. The
/// trainer owns the handle afterwards and the evaluator borrows it read-only.
pub trait DisparityNetwork {
    /// Build, or rebuild, the optimiser at the given learning rate.
    ///
    /// Recompiling resets optimiser state, so the schedule gates this behind
    /// [`CompileState`](crate::train::CompileState) within a multi-shard pass.
    fn compile(&mut self, learning_rate: f32) -> Result<()>;

    /// Run `opts.epochs` training epochs over one resident shard, invoking every callback at
    /// each epoch end with the 1-based epoch number.
    fn fit(
        &mut self,
        left: ArrayView4<f32>,
        right: ArrayView4<f32>,
        disparity: ArrayView4<f32>,
        opts: &FitOptions,
        callbacks: &mut [&mut dyn EpochCallback],
    ) -> Result<()>;

    /// Predict the normalised disparity field for a stereo batch.
    ///
    /// The output is `[batch, height, width, 1]` with values nominally in `[0, 1]`.
    fn predict(&self, left: ArrayView4<f32>, right: ArrayView4<f32>) -> Result<Array4<f32>>;

    /// Persist the trainable weights to `path`.
    fn save_weights(&self, path: &Path) -> Result<()>;

    /// Load trainable weights from a checkpoint produced by [`DisparityNetwork::save_weights`].
    fn load_weights(&mut self, path: &Path) -> Result<()>;
}

/// Epoch boundary hook run by [`DisparityNetwork::fit`].
pub trait EpochCallback {
    fn on_epoch_end(&mut self, epoch: usize, net: &dyn DisparityNetwork) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            epochs: 1,
            batch_size: 4,
            shuffle: true,
        }
    }
}

impl FitOptions {
    /// Default options with the given epoch count.
    pub fn epochs(epochs: usize) -> Self {
        FitOptions {
            epochs,
            ..FitOptions::default()
        }
    }
}

impl<F> EpochCallback for F
where
    F: FnMut(usize, &dyn DisparityNetwork) -> Result<()>,
{
    fn on_epoch_end(&mut self, epoch: usize, net: &dyn DisparityNetwork) -> Result<()> {
        self(epoch, net)
    }
}

impl CheckpointWriter {
    pub fn new<P: AsRef<Path>>(dir: P, dataset: &str) -> Self {
        CheckpointWriter {
            dir: dir.as_ref().to_path_buf(),
            dataset: String::from(dataset),
        }
    }

    /// Checkpoint path for a 1-based epoch number.
    pub fn weights_path(&self, epoch: usize) -> PathBuf {
        self.dir
            .join(format!("{}.densemapnet.weights.{:02}.bin", self.dataset, epoch))
    }
}

impl EpochCallback for CheckpointWriter {
    fn on_epoch_end(&mut self, epoch: usize, net: &dyn DisparityNetwork) -> Result<()> {
        let path = self.weights_path(epoch);
        net.save_weights(&path)?;
        debug!("Checkpoint written: {}", path.display());
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
