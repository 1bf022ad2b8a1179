//! # Mean disparity baseline
//!
//! A deliberately tiny [`DisparityNetwork`] used to exercise the full pipeline without the
//! convolutional model. It learns a single scalar, the mean normalised disparity of whatever it
//! is fitted on, by plain gradient steps on the squared error, and predicts a constant field.
//! Useful as a sanity floor: any real network must beat it.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::model::{DisparityNetwork, EpochCallback, FitOptions};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// The constant field learner.
pub struct MeanDisparity {
    mean: f32,
    learning_rate: f32,
}

/// Serialised weight state.
#[derive(Debug, Serialize, Deserialize)]
struct Weights {
    mean: f32,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl MeanDisparity {
    pub fn new() -> Self {
        MeanDisparity {
            mean: 0.0,
            learning_rate: 1e-3,
        }
    }

    /// Current scalar estimate.
    pub fn mean(&self) -> f32 {
        self.mean
    }
}

impl Default for MeanDisparity {
    fn default() -> Self {
        MeanDisparity::new()
    }
}

impl DisparityNetwork for MeanDisparity {
    fn compile(&mut self, learning_rate: f32) -> Result<()> {
        self.learning_rate = learning_rate;
        Ok(())
    }

    /// One gradient step on the squared error of the constant field per epoch. Batch size and
    /// shuffling have no effect on a single scalar.
    fn fit(
        &mut self,
        _left: ArrayView4<f32>,
        _right: ArrayView4<f32>,
        disparity: ArrayView4<f32>,
        opts: &FitOptions,
        callbacks: &mut [&mut dyn EpochCallback],
    ) -> Result<()> {
        let target = disparity.mean().unwrap_or(0.0);
        for epoch in 1..=opts.epochs {
            self.mean -= self.learning_rate * 2.0 * (self.mean - target);
            for callback in callbacks.iter_mut() {
                callback.on_epoch_end(epoch, &*self)?;
            }
        }
        Ok(())
    }

    fn predict(&self, left: ArrayView4<f32>, _right: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, height, width, _) = left.dim();
        Ok(Array4::from_elem((batch, height, width, 1), self.mean))
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(&Weights { mean: self.mean })?;
        fs::write(path, json)?;
        Ok(())
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        let json = fs::read_to_string(path)?;
        let weights: Weights = serde_json::from_str(&json)?;
        self.mean = weights.mean;
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
