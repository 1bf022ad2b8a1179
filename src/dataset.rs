//! # Dataset loading
//!
//! This module locates, loads and normalises the sharded stereo/disparity arrays a dataset is
//! staged as. One dataset is a family of `.npz` archives in a single directory:
//!
//! * `<name>.train.<kind>.<index>.npz` with `kind` one of `left`, `right`, `disparity` and
//!   `index` counting shards from 1, and
//! * `<name>.test.<kind>.npz` for the held-out split, with a `<name>_complete.test.<kind>.npz`
//!   variant evaluated in prediction mode.
//!
//! Disparity values are normalised by the global maximum over the whole corpus so that both the
//! training target and the network output live in `[0, 1]`. Images are kept in their raw on-disk
//! value range, rescaling them is the network's concern.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use ndarray::{Array4, ArrayD, Axis, Ix3, Ix4};
use ndarray_npy::NpzReader;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::settings::FrameDims;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Seed for the running minimum, the upper bound of 8 bit disparity data.
const SEED_MIN: f32 = 255.0;

/// Seed for the running maximum.
const SEED_MAX: f32 = 0.0;

/// Entry names tried when opening an archive. `numpy.savez` stores a single unnamed array
/// under `arr_0.npy`, some writers drop the extension.
const ARRAY_NAMES: [&str; 2] = ["arr_0.npy", "arr_0"];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Global disparity extrema over every shard of a dataset plus its test split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityRange {
    pub min: f32,
    pub max: f32,
}

/// One resident shard or split.
///
/// All three tensors share the `[batch, height, width, channels]` layout. `disparity` always
/// has a single channel and is normalised to `[0, 1]` by the global maximum.
pub struct SplitData {
    pub left: Array4<f32>,
    pub right: Array4<f32>,
    pub disparity: Array4<f32>,
}

/// Locator and reader for one staged dataset.
pub struct DatasetLoader {
    root: PathBuf,
    dataset: String,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityRange {
    fn seed() -> Self {
        DisparityRange {
            min: SEED_MIN,
            max: SEED_MAX,
        }
    }

    /// Fold the extrema of `values` into the running range.
    ///
    /// Min and max are each associative and commutative so the result is independent of the
    /// order shards are visited in.
    fn fold(self, values: &ArrayD<f32>) -> Self {
        DisparityRange {
            min: values.iter().fold(self.min, |m, &v| m.min(v)),
            max: values.iter().fold(self.max, |m, &v| m.max(v)),
        }
    }
}

impl SplitData {
    /// Number of samples in the split.
    pub fn samples(&self) -> usize {
        self.left.dim().0
    }

    /// Frame dimensions derived from the left-image tensor.
    pub fn dims(&self) -> FrameDims {
        let (_, height, width, channels) = self.left.dim();
        FrameDims {
            width,
            height,
            channels,
        }
    }
}

impl DatasetLoader {
    /// Create a loader for the dataset `name` staged under `root`.
    pub fn new<P: AsRef<Path>>(root: P, name: &str) -> Self {
        DatasetLoader {
            root: root.as_ref().to_path_buf(),
            dataset: String::from(name),
        }
    }

    /// Compute the global disparity range over the given train shards and the test split
    /// (the complete variant when `complete` is set).
    ///
    /// Any missing shard is fatal.
    pub fn disparity_range(&self, shard_indices: &[u32], complete: bool) -> Result<DisparityRange> {
        let mut range = DisparityRange::seed();
        for &index in shard_indices {
            let disparity = load_array(&self.train_file("disparity", index))?;
            range = range.fold(&disparity);
        }
        let disparity = load_array(&self.test_file("disparity", complete))?;
        range = range.fold(&disparity);

        info!("Max disparity: {}", range.max);
        info!("Min disparity: {}", range.min);
        Ok(range)
    }

    /// Load one train shard (1-based index), normalising its disparity by the global maximum.
    ///
    /// Loading the same shard twice yields identical tensors, the loader holds no state
    /// between calls. All shards of a dataset are assumed to share the same frame dimensions,
    /// there is no cross-shard consistency check.
    pub fn load_train_shard(&self, index: u32, range: &DisparityRange) -> Result<SplitData> {
        Ok(SplitData {
            left: load_images(&self.train_file("left", index))?,
            right: load_images(&self.train_file("right", index))?,
            disparity: self.load_disparity(&self.train_file("disparity", index), range)?,
        })
    }

    /// Load the held-out test split, or its complete variant when `complete` is set.
    pub fn load_test_split(&self, range: &DisparityRange, complete: bool) -> Result<SplitData> {
        Ok(SplitData {
            left: load_images(&self.test_file("left", complete))?,
            right: load_images(&self.test_file("right", complete))?,
            disparity: self.load_disparity(&self.test_file("disparity", complete), range)?,
        })
    }

    fn load_disparity(&self, path: &Path, range: &DisparityRange) -> Result<Array4<f32>> {
        let raw = load_array(path)?;
        let scaled = if range.max > 0.0 { raw / range.max } else { raw };
        to_batch4(scaled, path)
    }

    fn train_file(&self, kind: &str, index: u32) -> PathBuf {
        self.root
            .join(format!("{}.train.{}.{}.npz", self.dataset, kind, index))
    }

    fn test_file(&self, kind: &str, complete: bool) -> PathBuf {
        if complete {
            self.root
                .join(format!("{}_complete.test.{}.npz", self.dataset, kind))
        } else {
            self.root.join(format!("{}.test.{}.npz", self.dataset, kind))
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Read the single array stored in an npz archive, widening integer element types to `f32`.
/// Staged datasets keep images as u8 and kitti2015 disparity as u16.
fn load_array(path: &Path) -> Result<ArrayD<f32>> {
    info!("Loading... {}", path.display());

    let file = File::open(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => Error::MissingFile {
            path: path.to_path_buf(),
            source,
        },
        _ => Error::Io(source),
    })?;
    let mut npz = NpzReader::new(file).map_err(|source| Error::ArrayDecode {
        path: path.to_path_buf(),
        source,
    })?;

    let mut decode_err = None;
    for name in &ARRAY_NAMES {
        match entry::<f32>(&mut npz, name) {
            Ok(arr) => return Ok(arr),
            Err(e) => decode_err = Some(e),
        }
        if let Ok(arr) = entry::<u8>(&mut npz, name) {
            return Ok(arr.mapv(f32::from));
        }
        if let Ok(arr) = entry::<u16>(&mut npz, name) {
            return Ok(arr.mapv(f32::from));
        }
        if let Ok(arr) = entry::<i32>(&mut npz, name) {
            return Ok(arr.mapv(|v| v as f32));
        }
    }

    // Both entry names failed for every accepted element type.
    Err(match decode_err {
        Some(source) => Error::ArrayDecode {
            path: path.to_path_buf(),
            source,
        },
        None => Error::ArrayElementType {
            path: path.to_path_buf(),
        },
    })
}

fn entry<T>(
    npz: &mut NpzReader<File>,
    name: &str,
) -> std::result::Result<ArrayD<T>, ndarray_npy::ReadNpzError>
where
    T: ndarray_npy::ReadableElement,
{
    npz.by_name(name)
}

/// Load a raw image batch without rescaling its values.
fn load_images(path: &Path) -> Result<Array4<f32>> {
    let raw = load_array(path)?;
    to_batch4(raw, path)
}

/// Shape an array into the `[batch, height, width, channels]` layout, inserting the trailing
/// channel axis for 3 dimensional grayscale batches.
fn to_batch4(raw: ArrayD<f32>, path: &Path) -> Result<Array4<f32>> {
    let shape = raw.shape().to_vec();
    match raw.ndim() {
        3 => {
            let arr = raw.into_dimensionality::<Ix3>().map_err(|_| Error::ArrayShape {
                path: path.to_path_buf(),
                shape: shape.clone(),
                expected: "[batch, height, width]",
            })?;
            Ok(arr.insert_axis(Axis(3)))
        }
        4 => raw.into_dimensionality::<Ix4>().map_err(|_| Error::ArrayShape {
            path: path.to_path_buf(),
            shape,
            expected: "[batch, height, width, channels]",
        }),
        _ => Err(Error::ArrayShape {
            path: path.to_path_buf(),
            shape,
            expected: "[batch, height, width, channels]",
        }),
    }
}

// -----------------------------------------------------------------------------------------------
// TEST FIXTURES
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fixtures {
    use ndarray::{ArrayD, IxDyn};
    use ndarray_npy::NpzWriter;
    use std::fs::File;
    use std::path::Path;

    pub fn write_npz(path: &Path, array: &ArrayD<f32>) {
        let mut npz = NpzWriter::new(File::create(path).expect("create archive"));
        npz.add_array("arr_0", array).expect("write array");
        npz.finish().expect("finish archive");
    }

    pub fn images(fill: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(&[2, 4, 6, 3]), fill)
    }

    pub fn disparity(fill: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(&[2, 4, 6]), fill)
    }

    /// Stage a dataset with one train shard per entry of `shard_fills` plus a test split.
    /// Disparity tensors are constant at the given fill value so ranges are predictable.
    pub fn stage_dataset(root: &Path, name: &str, shard_fills: &[f32], test_fill: f32) {
        for (i, &fill) in shard_fills.iter().enumerate() {
            let index = i + 1;
            write_npz(
                &root.join(format!("{}.train.left.{}.npz", name, index)),
                &images(120.0),
            );
            write_npz(
                &root.join(format!("{}.train.right.{}.npz", name, index)),
                &images(90.0),
            );
            write_npz(
                &root.join(format!("{}.train.disparity.{}.npz", name, index)),
                &disparity(fill),
            );
        }
        write_npz(&root.join(format!("{}.test.left.npz", name)), &images(120.0));
        write_npz(&root.join(format!("{}.test.right.npz", name)), &images(90.0));
        write_npz(
            &root.join(format!("{}.test.disparity.npz", name)),
            &disparity(test_fill),
        );
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use ndarray::IxDyn;
    use ndarray_npy::NpzWriter;

    #[test]
    fn range_is_the_union_over_shards_and_test_split() {
        let dir = tempfile::tempdir().expect("tempdir");
        stage_dataset(dir.path(), "synth", &[10.0, 30.0, 20.0], 5.0);
        let loader = DatasetLoader::new(dir.path(), "synth");

        let range = loader.disparity_range(&[1, 2, 3], false).expect("range");
        assert_eq!(range.min, 5.0);
        assert_eq!(range.max, 30.0);
    }

    #[test]
    fn range_does_not_depend_on_shard_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        stage_dataset(dir.path(), "synth", &[10.0, 30.0, 20.0], 5.0);
        let loader = DatasetLoader::new(dir.path(), "synth");

        let forward = loader.disparity_range(&[1, 2, 3], false).expect("range");
        let shuffled = loader.disparity_range(&[3, 1, 2], false).expect("range");
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn disparity_is_normalised_to_the_unit_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        stage_dataset(dir.path(), "synth", &[30.0], 5.0);
        let loader = DatasetLoader::new(dir.path(), "synth");
        let range = loader.disparity_range(&[1], false).expect("range");

        let shard = loader.load_train_shard(1, &range).expect("shard");
        assert_eq!(shard.disparity.dim(), (2, 4, 6, 1));
        assert!(shard.disparity.iter().all(|&v| (0.0..=1.0).contains(&v)));

        let test = loader.load_test_split(&range, false).expect("test split");
        let expected = 5.0 / 30.0;
        assert!(test.disparity.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn images_keep_their_raw_value_range() {
        let dir = tempfile::tempdir().expect("tempdir");
        stage_dataset(dir.path(), "synth", &[30.0], 5.0);
        let loader = DatasetLoader::new(dir.path(), "synth");
        let range = loader.disparity_range(&[1], false).expect("range");

        let shard = loader.load_train_shard(1, &range).expect("shard");
        assert!(shard.left.iter().all(|&v| v == 120.0));
        assert!(shard.right.iter().all(|&v| v == 90.0));
    }

    #[test]
    fn missing_shards_are_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = DatasetLoader::new(dir.path(), "synth");

        match loader.disparity_range(&[1], false) {
            Err(Error::MissingFile { path, .. }) => {
                assert!(path.ends_with("synth.train.disparity.1.npz"));
            }
            other => panic!("expected a missing file error, got {:?}", other),
        }
    }

    #[test]
    fn integer_archives_are_widened_to_f32() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("synth.test.disparity.npz");
        let raw = ndarray::ArrayD::from_elem(IxDyn(&[2, 4, 6]), 7u8);
        let mut npz = NpzWriter::new(std::fs::File::create(&path).expect("create"));
        npz.add_array("arr_0", &raw).expect("write");
        npz.finish().expect("finish");

        let loaded = super::load_array(&path).expect("load");
        assert!(loaded.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn grayscale_batches_get_a_channel_axis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let name = "mono";
        write_npz(
            &dir.path().join(format!("{}.test.left.npz", name)),
            &ArrayD::from_elem(IxDyn(&[2, 4, 6]), 50.0),
        );
        write_npz(
            &dir.path().join(format!("{}.test.right.npz", name)),
            &ArrayD::from_elem(IxDyn(&[2, 4, 6]), 60.0),
        );
        write_npz(
            &dir.path().join(format!("{}.test.disparity.npz", name)),
            &disparity(8.0),
        );

        let loader = DatasetLoader::new(dir.path(), name);
        let range = DisparityRange { min: 0.0, max: 8.0 };
        let split = loader.load_test_split(&range, false).expect("split");
        assert_eq!(split.left.dim(), (2, 4, 6, 1));
        assert_eq!(
            split.dims(),
            FrameDims {
                width: 6,
                height: 4,
                channels: 1
            }
        );
    }

    #[test]
    fn dims_come_from_the_left_tensor() {
        let dir = tempfile::tempdir().expect("tempdir");
        stage_dataset(dir.path(), "synth", &[30.0], 5.0);
        let loader = DatasetLoader::new(dir.path(), "synth");
        let range = loader.disparity_range(&[1], false).expect("range");

        let test = loader.load_test_split(&range, false).expect("split");
        assert_eq!(
            test.dims(),
            FrameDims {
                width: 6,
                height: 4,
                channels: 3
            }
        );
    }
}
