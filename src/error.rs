//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the stereo pipeline crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No images found under {0}")]
    NoImages(PathBuf),

    #[error("LEFT/RIGHT image counts differ: {left} left, {right} right")]
    PairCountMismatch { left: usize, right: usize },

    #[error("Image pair {index} does not correspond: {left:?} vs {right:?}")]
    PairNameMismatch {
        index: usize,
        left: String,
        right: String,
    },

    #[error("Pair {selected} out of range, {available} pairs available")]
    PairOutOfRange { selected: usize, available: usize },

    #[error("Chessboard detection failed: {0}")]
    Chessboard(String),

    #[error("Calibration failed: {0}")]
    Calibration(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Label file not found: {0}")]
    MissingLabel(PathBuf),

    #[error("Could not write image {0}")]
    ImageWrite(PathBuf),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
