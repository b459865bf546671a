//! # Disparity to depth conversion
//!
//! Converts disparity maps into depth grids with `depth = baseline * focal /
//! disparity`. Zero-disparity pixels are governed by an explicit policy rather
//! than silently producing infinities everywhere.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use ndarray::Array2;

use crate::disparity::DisparityMap;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// What to write for pixels whose disparity is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZeroDisparity {
    /// Let the division produce a non-finite value.
    NonFinite,
    /// Write the given maximum depth instead.
    Clamp(f32),
}

impl Default for ZeroDisparity {
    fn default() -> Self {
        ZeroDisparity::NonFinite
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Depth grid for the whole disparity map.
pub fn depth_from_disparity(
    disparity: &DisparityMap,
    baseline: f64,
    focal_length: f64,
    policy: ZeroDisparity,
) -> Array2<f32> {
    let scale = (baseline * focal_length) as f32;
    let mut depth = Array2::zeros((disparity.height(), disparity.width()));

    for y in 0..disparity.height() {
        for x in 0..disparity.width() {
            let d = disparity.get(x, y);
            depth[(y, x)] = match policy {
                ZeroDisparity::Clamp(max) if d == 0.0 => max,
                _ => scale / d,
            };
        }
    }

    depth
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
