//! # Qualitative image output
//!
//! This module writes the inspection images produced while evaluating a split: the raw stereo
//! inputs alongside the ground truth and predicted disparity fields rendered to 8 bit
//! grayscale. Everything lands under one root in a fixed
//! `<split>/{left,right,disparity,prediction}` tree.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, RgbImage};
use ndarray::ArrayView3;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Subdirectories created for every split.
const SPLIT_SUBDIRS: [&str; 4] = ["left", "right", "disparity", "prediction"];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Image sink rooted at an output directory.
pub struct ImageWriter {
    root: PathBuf,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl ImageWriter {
    /// Create the writer and its whole directory tree. Existing directories are reused.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for split in &["train", "test"] {
            for sub in &SPLIT_SUBDIRS {
                fs::create_dir_all(root.join(split).join(sub))?;
            }
        }
        Ok(ImageWriter { root })
    }

    /// Save one evaluated sample: raw inputs plus rendered ground truth and prediction.
    ///
    /// All four tensors are `[height, width, channels]` views of a single sample. The
    /// prediction is expected to be masked already where the dataset requires it.
    pub fn save_sample(
        &self,
        split: &str,
        index: usize,
        left: ArrayView3<f32>,
        right: ArrayView3<f32>,
        ground: ArrayView3<f32>,
        predicted: ArrayView3<f32>,
    ) -> Result<()> {
        save_raw(left, &self.path(split, "left", index))?;
        save_raw(right, &self.path(split, "right", index))?;
        disparity_to_luma(ground).save(self.path(split, "disparity", index))?;
        disparity_to_luma(predicted).save(self.path(split, "prediction", index))?;
        Ok(())
    }

    fn path(&self, split: &str, sub: &str, index: usize) -> PathBuf {
        self.root
            .join(split)
            .join(sub)
            .join(format!("{:04}.png", index))
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Renders a normalised disparity field to a Luma8 image.
///
/// Values are scaled from `[0, 1]` to `[0, 255]` and clipped on both ends, out of range
/// predictions saturate rather than wrap.
pub fn disparity_to_luma(field: ArrayView3<f32>) -> GrayImage {
    let (height, width, _) = field.dim();

    let mut new = GrayImage::new(width as u32, height as u32);

    for y in 0..new.height() {
        for x in 0..new.width() {
            let mut val = field[[y as usize, x as usize, 0]] * 255.0;

            if val < 0.0 {
                val = 0.0;
            }
            else if val > 255.0 {
                val = 255.0;
            }

            *new.get_pixel_mut(x, y) = image::Luma([val as u8]);
        }
    }

    new
}

/// Save a raw image tensor whose values are already in the `0..=255` range.
fn save_raw(img: ArrayView3<f32>, path: &Path) -> Result<()> {
    let (height, width, channels) = img.dim();

    match channels {
        1 => {
            let mut new = GrayImage::new(width as u32, height as u32);
            for y in 0..new.height() {
                for x in 0..new.width() {
                    let val = img[[y as usize, x as usize, 0]];
                    *new.get_pixel_mut(x, y) = image::Luma([clip_u8(val)]);
                }
            }
            new.save(path)?;
        }
        3 => {
            let mut new = RgbImage::new(width as u32, height as u32);
            for y in 0..new.height() {
                for x in 0..new.width() {
                    *new.get_pixel_mut(x, y) = image::Rgb([
                        clip_u8(img[[y as usize, x as usize, 0]]),
                        clip_u8(img[[y as usize, x as usize, 1]]),
                        clip_u8(img[[y as usize, x as usize, 2]]),
                    ]);
                }
            }
            new.save(path)?;
        }
        _ => {
            return Err(Error::ArrayShape {
                path: path.to_path_buf(),
                shape: vec![height, width, channels],
                expected: "1 or 3 channels",
            });
        }
    }

    Ok(())
}

fn clip_u8(val: f32) -> u8 {
    if val < 0.0 {
        0
    } else if val > 255.0 {
        255
    } else {
        val as u8
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn rendering_clips_to_the_displayable_range() {
        let mut field = Array3::zeros((1, 4, 1));
        field[[0, 0, 0]] = -0.5;
        field[[0, 1, 0]] = 0.0;
        field[[0, 2, 0]] = 0.5;
        field[[0, 3, 0]] = 1.5;

        let img = disparity_to_luma(field.view());
        assert_eq!(img.get_pixel(0, 0).0, [0]);
        assert_eq!(img.get_pixel(1, 0).0, [0]);
        assert_eq!(img.get_pixel(2, 0).0, [127]);
        assert_eq!(img.get_pixel(3, 0).0, [255]);
    }

    #[test]
    fn writer_creates_the_split_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        ImageWriter::new(dir.path().join("images")).expect("writer");

        for split in &["train", "test"] {
            for sub in &["left", "right", "disparity", "prediction"] {
                assert!(dir.path().join("images").join(split).join(sub).is_dir());
            }
        }
    }

    #[test]
    fn saved_samples_survive_a_png_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = ImageWriter::new(dir.path()).expect("writer");

        let mut left = Array3::zeros((2, 3, 3));
        for y in 0..2 {
            for x in 0..3 {
                for c in 0..3 {
                    left[[y, x, c]] = (y * 60 + x * 20 + c * 5) as f32;
                }
            }
        }
        let right = left.clone();
        let ground = Array3::from_elem((2, 3, 1), 0.5);
        let predicted = Array3::from_elem((2, 3, 1), 1.5);

        writer
            .save_sample(
                "test",
                7,
                left.view(),
                right.view(),
                ground.view(),
                predicted.view(),
            )
            .expect("save");

        let reread = image::open(dir.path().join("test/left/0007.png"))
            .expect("open")
            .to_rgb8();
        for y in 0..2u32 {
            for x in 0..3u32 {
                let expected = [
                    (y * 60 + x * 20) as u8,
                    (y * 60 + x * 20 + 5) as u8,
                    (y * 60 + x * 20 + 10) as u8,
                ];
                assert_eq!(reread.get_pixel(x, y).0, expected);
            }
        }

        let prediction = image::open(dir.path().join("test/prediction/0007.png"))
            .expect("open")
            .to_luma8();
        assert!(prediction.pixels().all(|p| p.0 == [255]));
    }

    #[test]
    fn two_channel_tensors_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = ImageWriter::new(dir.path()).expect("writer");

        let bad = Array3::zeros((2, 3, 2));
        let mono = Array3::zeros((2, 3, 1));
        let result = writer.save_sample(
            "test",
            0,
            bad.view(),
            bad.view(),
            mono.view(),
            mono.view(),
        );
        assert!(matches!(result, Err(Error::ArrayShape { .. })));
    }
}
