//! # Block matching disparity computation
//!
//! Window-based stereo correlation: for every pixel of the left image the right
//! image is searched along the same row over the disparity range, scoring each
//! candidate with the sum of absolute differences over the correlation window.
//! The winning disparity is refined to sub-pixel precision by fitting a parabola
//! through the criterion values either side of the minimum.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct BlockMatcher {
    params: Params,
    corr_window_range: std::ops::RangeInclusive<isize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Params {
    pub min_disparity: usize,
    pub num_disparities: usize,
    pub block_size: usize,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Params {
            min_disparity: 0,
            num_disparities: 80,
            block_size: 31,
        }
    }
}

impl BlockMatcher {
    /// Create a new instance of the algorithm with the given parameters.
    pub fn new(params: Params) -> Result<Self> {
        if params.block_size % 2 == 0 || params.block_size < 3 {
            return Err(Error::Config(format!(
                "block size must be odd and at least 3, got {}",
                params.block_size
            )));
        }
        if params.num_disparities == 0 {
            return Err(Error::Config("disparity range must be non-empty".into()));
        }

        let semi = (params.block_size as isize - 1) / 2;
        Ok(Self {
            params,
            corr_window_range: -semi..=semi,
        })
    }

    /// Calculate the correlation criterion for the given position and disparity.
    ///
    /// Window samples outside the image are clamped to the border, so the
    /// criterion is defined for every pixel of the row.
    fn get_criterion(&self, left: &GrayImage, right: &GrayImage, x: usize, y: usize, d: usize) -> f32 {
        let w = left.width() as isize;
        let h = left.height() as isize;
        let mut acc = 0.0f32;

        for j in self.corr_window_range.clone() {
            for i in self.corr_window_range.clone() {
                let xi = (x as isize + i).clamp(0, w - 1);
                let yj = (y as isize + j).clamp(0, h - 1);
                let xr = (xi - d as isize).clamp(0, w - 1);

                let l = left.get_pixel(xi as u32, yj as u32)[0] as f32;
                let r = right.get_pixel(xr as u32, yj as u32)[0] as f32;
                acc += (l - r).abs();
            }
        }

        acc
    }
}

impl DisparityAlgorithm for BlockMatcher {
    fn compute(&mut self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::Geometry(format!(
                "stereo pair dimensions differ: {}x{} vs {}x{}",
                left.width(),
                left.height(),
                right.width(),
                right.height()
            )));
        }

        let width = left.width() as usize;
        let height = left.height() as usize;
        let min_d = self.params.min_disparity;
        let max_d = min_d + self.params.num_disparities;

        let mut disp_map = DisparityMap::new(width, height);

        // Initial values are swapped so the first computed pixel takes over.
        let mut min_disp = max_d as f32;
        let mut max_disp = min_d as f32;

        for y in 0..height {
            for x in min_d..width {
                let range = max_d.min(x + 1).max(min_d);
                let mut crits: Vec<f32> = Vec::with_capacity(range - min_d);
                for d in min_d..range {
                    crits.push(self.get_criterion(left, right, x, y, d));
                }
                if crits.is_empty() {
                    continue;
                }

                let min_index = crits.iter().enumerate().fold(0, |min_idx, (idx, &val)| {
                    if val < crits[min_idx] {
                        idx
                    } else {
                        min_idx
                    }
                });

                // Sub pixel interpolation
                let disp_val: f32;
                if min_index == 0 || min_index == crits.len() - 1 || crits.len() < 3 {
                    disp_val = (min_d + min_index) as f32;
                } else {
                    let c_left = crits[min_index - 1];
                    let c_right = crits[min_index + 1];

                    // Denominator uses the higher neighbour so the offset stays
                    // within half a pixel.
                    let denom = match c_left > c_right {
                        true => 2.0 * (c_left - crits[min_index]),
                        false => 2.0 * (c_right - crits[min_index]),
                    };

                    disp_val = if denom.abs() > f32::EPSILON {
                        (min_d + min_index) as f32 + (c_left - c_right) / denom
                    } else {
                        (min_d + min_index) as f32
                    };
                }

                disp_map.put(x, y, disp_val);

                if disp_val > max_disp {
                    max_disp = disp_val;
                } else if disp_val < min_disp {
                    min_disp = disp_val;
                }
            }
        }

        disp_map.min_disp = Some(min_disp.min(max_disp));
        disp_map.max_disp = Some(max_disp.max(min_disp));

        Ok(disp_map)
    }

    fn name(&self) -> &'static str {
        "BM"
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Right image is the left image shifted right-to-left by `shift` pixels,
    /// which is exactly a constant disparity of `shift`.
    fn shifted_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
        let pattern = |x: u32, y: u32| (((x * 13 + y * 7) % 29) * 8) as u8;
        let left = GrayImage::from_fn(width, height, |x, y| image::Luma([pattern(x, y)]));
        let right = GrayImage::from_fn(width, height, |x, y| {
            image::Luma([pattern(x + shift, y)])
        });
        (left, right)
    }

    #[test]
    fn recovers_constant_shift() {
        let shift = 6u32;
        let (left, right) = shifted_pair(64, 32, shift);
        let mut matcher = BlockMatcher::new(Params {
            min_disparity: 0,
            num_disparities: 16,
            block_size: 7,
        })
        .unwrap();

        let map = matcher.compute(&left, &right).unwrap();

        // Check the interior, away from border clamping.
        let mut hits = 0;
        let mut total = 0;
        for y in 8..24usize {
            for x in 24..56usize {
                total += 1;
                if (map.get(x, y) - shift as f32).abs() <= 1.0 {
                    hits += 1;
                }
            }
        }
        assert!(hits * 10 >= total * 9, "only {hits}/{total} within 1 px");
    }

    #[test]
    fn rejects_even_block_size() {
        assert!(BlockMatcher::new(Params {
            min_disparity: 0,
            num_disparities: 16,
            block_size: 8,
        })
        .is_err());
    }

    #[test]
    fn rejects_mismatched_pair() {
        let left = GrayImage::new(32, 32);
        let right = GrayImage::new(16, 32);
        let mut matcher = BlockMatcher::new(Params::default()).unwrap();
        assert!(matcher.compute(&left, &right).is_err());
    }

    #[test]
    fn default_params_match_preset() {
        let p = Params::default();
        assert_eq!(p.num_disparities, 80);
        assert_eq!(p.block_size, 31);
    }
}
