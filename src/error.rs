//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

use std::path::PathBuf;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the densemapnet crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A dataset file expected by the naming scheme is absent. Shards are staged by an external
    /// pipeline so there is no fallback, the run must stop here.
    #[error("Missing dataset file {path}")]
    MissingFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not decode the array archive {path}")]
    ArrayDecode {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpzError,
    },

    /// The archive decoded but the stored element type is none of the accepted ones
    /// (f32, u8, u16 or i32).
    #[error("Unsupported element type in {path}")]
    ArrayElementType { path: PathBuf },

    #[error("Array in {path} has shape {shape:?}, expected {expected}")]
    ArrayShape {
        path: PathBuf,
        shape: Vec<usize>,
        expected: &'static str,
    },

    #[error("Inconsistent run settings: {0}")]
    InconsistentSettings(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON serialisation error")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error")]
    Image(#[from] image::ImageError),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}
