//! # Evaluation engine
//!
//! This module sweeps a split one sample at a time and reports the end-point-error of the
//! network's predictions in pixel units, optionally timing inference as it goes. A fixed
//! representative sample has its images written on every sweep, and the writer can be switched
//! to dump every sample instead.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use ndarray::{s, Axis};
use std::time::Instant;
use tracing::info;

use crate::dataset::SplitData;
use crate::error::Result;
use crate::images::ImageWriter;
use crate::model::DisparityNetwork;
use crate::settings::DatasetProfile;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Sample whose images are always written during a sweep. Splits with fewer samples simply
/// never reach it.
pub const VISUAL_SAMPLE_INDEX: usize = 10;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Which split a sweep runs over. Selects the image output subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    Train,
    Test,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Inference timing over a sweep, prediction only, no error computation included.
#[derive(Debug, Clone, Copy)]
pub struct Latency {
    /// Mean seconds per sample.
    pub mean_secs: f64,

    /// Samples per second.
    pub hz: f64,
}

/// Result of one evaluation sweep.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Mean end-point-error in pixel units.
    pub epe: f32,

    /// Present when the sweep was timed.
    pub latency: Option<Latency>,

    /// Number of samples evaluated.
    pub samples: usize,
}

/// Sweeps splits sample by sample, always with a prediction batch of one.
pub struct Evaluator {
    profile: DatasetProfile,
    dmax: f32,
    images: ImageWriter,
    all_samples: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl SplitKind {
    fn dir(self) -> &'static str {
        match self {
            SplitKind::Train => "train",
            SplitKind::Test => "test",
        }
    }
}

impl Evaluator {
    /// Create an evaluator for one dataset.
    ///
    /// `dmax` is the global disparity maximum, used to rescale the normalised error back to
    /// raw units before the profile's unit scale converts those to pixels. Setting
    /// `all_samples` writes qualitative images for every sample instead of just the fixed one.
    pub fn new(profile: DatasetProfile, dmax: f32, images: ImageWriter, all_samples: bool) -> Self {
        Evaluator {
            profile,
            dmax,
            images,
            all_samples,
        }
    }

    /// Compute the mean end-point-error of `net` over `split`.
    ///
    /// Datasets whose profile requires a validity mask have unknown (zero) ground truth pixels
    /// excluded from both the error sum and the per-sample denominator. A sample with no valid
    /// pixels contributes zero error rather than a division by zero.
    pub fn evaluate(
        &self,
        net: &dyn DisparityNetwork,
        split: &SplitData,
        kind: SplitKind,
        measure_performance: bool,
    ) -> Result<Evaluation> {
        let samples = split.samples();
        if samples == 0 {
            return Ok(Evaluation {
                epe: 0.0,
                latency: None,
                samples: 0,
            });
        }

        info!("Using {} data, {} samples", kind.dir(), samples);
        if self.all_samples {
            info!("Saving images of every sample...");
        }

        let mut epe_total = 0.0f32;
        let mut elapsed_total = 0.0f64;

        for i in 0..samples {
            let left = split.left.slice(s![i..i + 1, .., .., ..]);
            let right = split.right.slice(s![i..i + 1, .., .., ..]);

            let predicted = if measure_performance {
                let start = Instant::now();
                let predicted = net.predict(left, right)?;
                elapsed_total += start.elapsed().as_secs_f64();
                predicted
            } else {
                net.predict(left, right)?
            };

            let ground = split.disparity.index_axis(Axis(0), i);
            let mut pred = predicted.index_axis(Axis(0), 0).to_owned();

            let denominator = if self.profile.requires_validity_mask {
                let mask = ground.mapv(f32::ceil);
                pred = pred * &mask;
                mask.iter().filter(|&&v| v != 0.0).count()
            } else {
                let (height, width, _) = pred.dim();
                height * width
            };

            let abs_error: f32 = pred
                .iter()
                .zip(ground.iter())
                .map(|(p, g)| (p - g).abs())
                .sum();
            if denominator > 0 {
                epe_total += abs_error / denominator as f32;
            }

            if self.all_samples || i == VISUAL_SAMPLE_INDEX {
                self.images.save_sample(
                    kind.dir(),
                    i,
                    split.left.index_axis(Axis(0), i),
                    split.right.index_axis(Axis(0), i),
                    ground,
                    pred.view(),
                )?;
            }
        }

        // Back from normalised units to raw disparity units, then to pixels.
        let mut epe = epe_total / samples as f32;
        epe *= self.dmax;
        epe /= self.profile.disparity_unit_scale;
        info!("EPE: {:.2}pix", epe);

        let latency = if measure_performance {
            let latency = Latency {
                mean_secs: elapsed_total / samples as f64,
                hz: samples as f64 / elapsed_total,
            };
            info!("Speed: {:.4}sec", latency.mean_secs);
            info!("Speed: {:.4}Hz", latency.hz);
            Some(latency)
        } else {
            None
        };

        Ok(Evaluation {
            epe,
            latency,
            samples,
        })
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EpochCallback, FitOptions};
    use ndarray::{Array4, ArrayView4};
    use std::path::Path;

    struct ConstNetwork(f32);

    impl DisparityNetwork for ConstNetwork {
        fn compile(&mut self, _learning_rate: f32) -> Result<()> {
            Ok(())
        }

        fn fit(
            &mut self,
            _left: ArrayView4<f32>,
            _right: ArrayView4<f32>,
            _disparity: ArrayView4<f32>,
            _opts: &FitOptions,
            _callbacks: &mut [&mut dyn EpochCallback],
        ) -> Result<()> {
            Ok(())
        }

        fn predict(&self, left: ArrayView4<f32>, _right: ArrayView4<f32>) -> Result<Array4<f32>> {
            let (batch, height, width, _) = left.dim();
            Ok(Array4::from_elem((batch, height, width, 1), self.0))
        }

        fn save_weights(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn load_weights(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn split(samples: usize, disparity_fill: f32) -> SplitData {
        SplitData {
            left: Array4::from_elem((samples, 2, 2, 1), 100.0),
            right: Array4::from_elem((samples, 2, 2, 1), 100.0),
            disparity: Array4::from_elem((samples, 2, 2, 1), disparity_fill),
        }
    }

    fn evaluator(profile: DatasetProfile, dmax: f32, all_samples: bool) -> (Evaluator, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let images = ImageWriter::new(dir.path().join("images")).expect("writer");
        (Evaluator::new(profile, dmax, images, all_samples), dir)
    }

    #[test]
    fn exact_predictions_give_zero_epe() {
        let (evaluator, _dir) = evaluator(DatasetProfile::default(), 32.0, false);
        let net = ConstNetwork(0.5);
        let eval = evaluator
            .evaluate(&net, &split(3, 0.5), SplitKind::Test, false)
            .expect("evaluate");
        assert_eq!(eval.epe, 0.0);
        assert_eq!(eval.samples, 3);
        assert!(eval.latency.is_none());
    }

    #[test]
    fn epe_is_rescaled_to_pixel_units() {
        // dmax 40 and a dense profile: a constant error of 0.1 in normalised units is 4 pixels.
        let (evaluator, _dir) = evaluator(DatasetProfile::default(), 40.0, false);
        let net = ConstNetwork(0.6);
        let eval = evaluator
            .evaluate(&net, &split(2, 0.5), SplitKind::Test, false)
            .expect("evaluate");
        assert!((eval.epe - 4.0).abs() < 1e-4);
    }

    #[test]
    fn masked_pixels_are_excluded_from_the_denominator() {
        let profile = DatasetProfile::for_dataset("kitti2015");
        let (evaluator, _dir) = evaluator(profile, 512.0, false);

        let mut data = split(1, 0.0);
        data.disparity[[0, 0, 0, 0]] = 0.5;
        let net = ConstNetwork(0.25);

        // One valid pixel with error 0.25, rescaled by 512 then divided by the
        // 256 units-per-pixel encoding.
        let eval = evaluator
            .evaluate(&net, &data, SplitKind::Test, false)
            .expect("evaluate");
        assert!((eval.epe - 0.5).abs() < 1e-4);
    }

    #[test]
    fn all_zero_ground_truth_does_not_poison_the_error() {
        let profile = DatasetProfile::for_dataset("kitti2015");
        let (evaluator, _dir) = evaluator(profile, 512.0, false);
        let net = ConstNetwork(0.7);

        let eval = evaluator
            .evaluate(&net, &split(2, 0.0), SplitKind::Test, false)
            .expect("evaluate");
        assert!(!eval.epe.is_nan());
        assert_eq!(eval.epe, 0.0);
    }

    #[test]
    fn latency_is_present_only_when_measured() {
        let (evaluator, _dir) = evaluator(DatasetProfile::default(), 32.0, false);
        let net = ConstNetwork(0.5);

        let untimed = evaluator
            .evaluate(&net, &split(2, 0.5), SplitKind::Test, false)
            .expect("evaluate");
        assert!(untimed.latency.is_none());

        let timed = evaluator
            .evaluate(&net, &split(2, 0.5), SplitKind::Test, true)
            .expect("evaluate");
        let latency = timed.latency.expect("latency");
        assert!(latency.mean_secs >= 0.0);
        assert!(latency.hz > 0.0);
    }

    #[test]
    fn the_fixed_sample_gets_its_images_written() {
        let (evaluator, dir) = evaluator(DatasetProfile::default(), 32.0, false);
        let net = ConstNetwork(0.5);
        evaluator
            .evaluate(&net, &split(12, 0.5), SplitKind::Test, false)
            .expect("evaluate");

        let images = dir.path().join("images");
        assert!(images.join("test/prediction/0010.png").exists());
        assert!(images.join("test/disparity/0010.png").exists());
        assert!(!images.join("test/prediction/0009.png").exists());
    }

    #[test]
    fn generate_images_writes_every_sample() {
        let (evaluator, dir) = evaluator(DatasetProfile::default(), 32.0, true);
        let net = ConstNetwork(0.5);
        evaluator
            .evaluate(&net, &split(3, 0.5), SplitKind::Train, false)
            .expect("evaluate");

        let images = dir.path().join("images");
        for i in 0..3 {
            assert!(images
                .join(format!("train/prediction/{:04}.png", i))
                .exists());
        }
    }
}
