//! # General disparity objects
//!
//! This module provides the disparity map structure and the trait implemented by
//! the individual matching algorithms.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;
use ndarray::Array2;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A floating point disparity map in true pixel units.
pub struct DisparityMap {
    data: Array2<f32>,
    pub max_disp: Option<f32>,
    pub min_disp: Option<f32>,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given rectified stereo pair.
    fn compute(&mut self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap>;

    /// Short tag identifying the algorithm, used in output paths.
    fn name(&self) -> &'static str;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    pub fn new(width: usize, height: usize) -> Self {
        DisparityMap {
            data: Array2::zeros((height, width)),
            min_disp: None,
            max_disp: None,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[(y, x)]
    }

    pub fn put(&mut self, x: usize, y: usize, val: f32) {
        self.data[(y, x)] = val;
    }

    /// The underlying row-major array.
    pub fn as_array(&self) -> &Array2<f32> {
        &self.data
    }

    /// Min and max over the whole map, preferring the stats the algorithm set.
    pub fn value_range(&self) -> (f32, f32) {
        match (self.min_disp, self.max_disp) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => self.data.iter().fold(
                (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            ),
        }
    }

    /// Converts the map into a Luma8 image scaled so the observed range spans
    /// the full 0..=255 interval.
    pub fn to_luma_normalised(&self) -> GrayImage {
        let mut new = GrayImage::new(self.width() as u32, self.height() as u32);

        let (lo, hi) = self.value_range();
        let span = hi - lo;
        let mult = if span.abs() > f32::EPSILON {
            255.0 / span
        } else {
            0.0
        };

        for y in 0..new.height() {
            for x in 0..new.width() {
                let val = ((self.get(x as usize, y as usize) - lo) * mult).clamp(0.0, 255.0);
                *new.get_pixel_mut(x, y) = image::Luma([val as u8]);
            }
        }

        new
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalised_luma_spans_full_range() {
        let mut map = DisparityMap::new(3, 1);
        map.put(0, 0, 10.0);
        map.put(1, 0, 20.0);
        map.put(2, 0, 30.0);

        let luma = map.to_luma_normalised();
        assert_eq!(luma.get_pixel(0, 0)[0], 0);
        assert_eq!(luma.get_pixel(1, 0)[0], 127);
        assert_eq!(luma.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn constant_map_normalises_to_zero() {
        let mut map = DisparityMap::new(2, 2);
        for y in 0..2 {
            for x in 0..2 {
                map.put(x, y, 42.0);
            }
        }
        let luma = map.to_luma_normalised();
        assert!(luma.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn explicit_stats_override_observed_range() {
        let mut map = DisparityMap::new(2, 1);
        map.put(0, 0, 0.0);
        map.put(1, 0, 50.0);
        map.min_disp = Some(0.0);
        map.max_disp = Some(100.0);

        let luma = map.to_luma_normalised();
        assert_eq!(luma.get_pixel(1, 0)[0], 127);
    }
}
