//! # Semi-global matching disparity computation
//!
//! Pixel-wise matching costs on x-gradient prefiltered images, aggregated along
//! eight scanline directions with the usual small/large smoothness penalties,
//! followed by winner-take-all selection, sub-pixel refinement and the standard
//! post-processing chain: uniqueness check, left/right consistency check and
//! speckle removal. Pixels rejected by any check are written as zero disparity.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// The eight aggregation directions: horizontal, vertical and the diagonals.
const PATHS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (-1, 1),
    (1, -1),
    (-1, -1),
];

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct SemiGlobalMatcher {
    params: Params,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Params {
    pub min_disparity: usize,
    pub num_disparities: usize,
    pub block_size: usize,
    /// Penalty for a disparity change of 1 between neighbours.
    pub p1: u32,
    /// Penalty for larger disparity changes.
    pub p2: u32,
    /// Maximum allowed difference in the left/right consistency check.
    pub disp12_max_diff: i32,
    /// Gradient prefilter values are clipped to this magnitude.
    pub pre_filter_cap: i16,
    /// Margin in percent by which the best cost must beat the runner-up.
    pub uniqueness_ratio: u32,
    /// Connected regions smaller than this are removed as speckle.
    pub speckle_window_size: usize,
    /// Maximum disparity variation inside one speckle region.
    pub speckle_range: f32,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Params {
            min_disparity: 12,
            num_disparities: 144,
            block_size: 3,
            p1: 600,
            p2: 2400,
            disp12_max_diff: 1,
            pre_filter_cap: 16,
            uniqueness_ratio: 1,
            speckle_window_size: 150,
            speckle_range: 20.0,
        }
    }
}

impl SemiGlobalMatcher {
    pub fn new(params: Params) -> Result<Self> {
        if params.num_disparities == 0 {
            return Err(Error::Config("disparity range must be non-empty".into()));
        }
        if params.block_size % 2 == 0 {
            return Err(Error::Config(format!(
                "block size must be odd, got {}",
                params.block_size
            )));
        }
        if params.p2 <= params.p1 {
            return Err(Error::Config(format!(
                "p2 ({}) must exceed p1 ({})",
                params.p2, params.p1
            )));
        }
        Ok(Self { params })
    }

    /// Horizontal Sobel response clipped to the prefilter cap.
    fn prefilter(&self, img: &GrayImage) -> Vec<i16> {
        let width = img.width() as i32;
        let height = img.height() as i32;
        let cap = self.params.pre_filter_cap;
        let mut out = vec![0i16; (width * height) as usize];

        let sample = |x: i32, y: i32| -> i32 {
            let xc = x.clamp(0, width - 1) as u32;
            let yc = y.clamp(0, height - 1) as u32;
            img.get_pixel(xc, yc)[0] as i32
        };

        for y in 0..height {
            for x in 0..width {
                let gx = (sample(x + 1, y - 1) - sample(x - 1, y - 1))
                    + 2 * (sample(x + 1, y) - sample(x - 1, y))
                    + (sample(x + 1, y + 1) - sample(x - 1, y + 1));
                out[(y * width + x) as usize] =
                    (gx / 4).clamp(-(cap as i32), cap as i32) as i16;
            }
        }

        out
    }

    /// SAD cost volume over the prefiltered images, laid out as
    /// `[(y * width + x) * num_disparities + d_idx]`.
    fn compute_matching_costs(
        &self,
        left: &[i16],
        right: &[i16],
        width: usize,
        height: usize,
    ) -> Vec<u32> {
        let num_d = self.params.num_disparities;
        let min_d = self.params.min_disparity;
        let half = (self.params.block_size / 2) as i32;
        let mut costs = vec![0u32; width * height * num_d];

        for y in 0..height {
            for x in 0..width {
                let base = (y * width + x) * num_d;
                for d_idx in 0..num_d {
                    let d = (min_d + d_idx) as i32;
                    let mut cost = 0u32;

                    for dy in -half..=half {
                        let ly = (y as i32 + dy).clamp(0, height as i32 - 1) as usize;
                        for dx in -half..=half {
                            let lx = (x as i32 + dx).clamp(0, width as i32 - 1);
                            let rx = (lx - d).clamp(0, width as i32 - 1);
                            let l = left[ly * width + lx as usize] as i32;
                            let r = right[ly * width + rx as usize] as i32;
                            cost += l.abs_diff(r);
                        }
                    }

                    costs[base + d_idx] = cost;
                }
            }
        }

        costs
    }

    fn aggregate_costs(&self, cost_volume: &[u32], width: usize, height: usize) -> Vec<u32> {
        let num_d = self.params.num_disparities;
        let mut aggregated = vec![0u32; width * height * num_d];
        // Scratch buffer reused across directions.
        let mut path_costs = vec![0u32; width * height * num_d];

        for &(dx, dy) in &PATHS {
            self.aggregate_along_path(
                cost_volume,
                &mut aggregated,
                &mut path_costs,
                width,
                height,
                dx,
                dy,
            );
        }

        aggregated
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregate_along_path(
        &self,
        cost_volume: &[u32],
        aggregated: &mut [u32],
        path_costs: &mut [u32],
        width: usize,
        height: usize,
        dx: i32,
        dy: i32,
    ) {
        let num_d = self.params.num_disparities;
        let p1 = self.params.p1;
        let p2 = self.params.p2;

        let (x_start, x_end, x_step) = if dx >= 0 {
            (0i32, width as i32, 1i32)
        } else {
            (width as i32 - 1, -1i32, -1i32)
        };
        let (y_start, y_end, y_step) = if dy >= 0 {
            (0i32, height as i32, 1i32)
        } else {
            (height as i32 - 1, -1i32, -1i32)
        };

        let mut y = y_start;
        while y != y_end {
            let mut x = x_start;
            while x != x_end {
                let px = x - dx;
                let py = y - dy;
                let idx_base = (y as usize * width + x as usize) * num_d;

                if px >= 0 && px < width as i32 && py >= 0 && py < height as i32 {
                    let prev_idx = (py as usize * width + px as usize) * num_d;
                    let mut prev_min = u32::MAX;
                    for pd in 0..num_d {
                        prev_min = prev_min.min(path_costs[prev_idx + pd]);
                    }
                    let p2_base = prev_min.saturating_add(p2);

                    for d in 0..num_d {
                        let cd = cost_volume[idx_base + d];
                        let l0 = path_costs[prev_idx + d];
                        let l1 = if d > 0 {
                            path_costs[prev_idx + d - 1].saturating_add(p1)
                        } else {
                            u32::MAX
                        };
                        let l2 = if d + 1 < num_d {
                            path_costs[prev_idx + d + 1].saturating_add(p1)
                        } else {
                            u32::MAX
                        };
                        let best_prev = l0.min(l1).min(l2).min(p2_base);
                        let lr = cd.saturating_add(best_prev.saturating_sub(prev_min));
                        path_costs[idx_base + d] = lr;
                        aggregated[idx_base + d] = aggregated[idx_base + d].saturating_add(lr);
                    }
                } else {
                    // Path enters the image here.
                    for d in 0..num_d {
                        let cd = cost_volume[idx_base + d];
                        path_costs[idx_base + d] = cd;
                        aggregated[idx_base + d] = aggregated[idx_base + d].saturating_add(cd);
                    }
                }

                x += x_step;
            }
            y += y_step;
        }
    }

    /// Winner-take-all with uniqueness check and sub-pixel refinement.
    ///
    /// Returns NaN for pixels failing the uniqueness check.
    fn select_disparity(&self, aggregated: &[u32], base: usize) -> f32 {
        let num_d = self.params.num_disparities;
        let min_d = self.params.min_disparity;

        let mut best_d = 0usize;
        let mut best_cost = u32::MAX;
        for d in 0..num_d {
            let cost = aggregated[base + d];
            if cost < best_cost {
                best_cost = cost;
                best_d = d;
            }
        }

        if self.params.uniqueness_ratio > 0 {
            let threshold =
                best_cost as u64 * (100 + self.params.uniqueness_ratio as u64) / 100;
            for d in 0..num_d {
                if d.abs_diff(best_d) > 1 && (aggregated[base + d] as u64) < threshold {
                    return f32::NAN;
                }
            }
        }

        // Sub pixel interpolation
        if best_d == 0 || best_d == num_d - 1 {
            return (min_d + best_d) as f32;
        }
        let c_left = aggregated[base + best_d - 1] as f32;
        let c_right = aggregated[base + best_d + 1] as f32;
        let c_min = best_cost as f32;
        let denom = match c_left > c_right {
            true => 2.0 * (c_left - c_min),
            false => 2.0 * (c_right - c_min),
        };
        if denom.abs() > f32::EPSILON {
            (min_d + best_d) as f32 + (c_left - c_right) / denom
        } else {
            (min_d + best_d) as f32
        }
    }

    /// Disparity of the right image derived from the same aggregated volume:
    /// right pixel x matches left pixel x + d.
    fn right_disparity(&self, aggregated: &[u32], width: usize, y: usize, x: usize) -> i32 {
        let num_d = self.params.num_disparities;
        let min_d = self.params.min_disparity;

        let mut best_d = 0usize;
        let mut best_cost = u32::MAX;
        for d in 0..num_d {
            let lx = x + min_d + d;
            if lx >= width {
                break;
            }
            let cost = aggregated[(y * width + lx) * num_d + d];
            if cost < best_cost {
                best_cost = cost;
                best_d = d;
            }
        }

        (min_d + best_d) as i32
    }

    /// Remove connected regions smaller than the speckle window.
    ///
    /// Two neighbouring pixels belong to the same region when their disparities
    /// differ by at most the speckle range.
    fn filter_speckles(&self, disp: &mut [f32], width: usize, height: usize) {
        if self.params.speckle_window_size == 0 {
            return;
        }

        let mut labels = vec![0u32; width * height];
        let mut next_label = 1u32;
        let mut stack = Vec::new();
        let mut region = Vec::new();

        for start in 0..width * height {
            if labels[start] != 0 || disp[start] == 0.0 {
                continue;
            }

            region.clear();
            stack.push(start);
            labels[start] = next_label;

            while let Some(idx) = stack.pop() {
                region.push(idx);
                let x = idx % width;
                let y = idx / width;

                let mut visit = |nx: usize, ny: usize| {
                    let nidx = ny * width + nx;
                    if labels[nidx] == 0
                        && disp[nidx] != 0.0
                        && (disp[nidx] - disp[idx]).abs() <= self.params.speckle_range
                    {
                        labels[nidx] = next_label;
                        stack.push(nidx);
                    }
                };

                if x > 0 {
                    visit(x - 1, y);
                }
                if x + 1 < width {
                    visit(x + 1, y);
                }
                if y > 0 {
                    visit(x, y - 1);
                }
                if y + 1 < height {
                    visit(x, y + 1);
                }
            }

            if region.len() < self.params.speckle_window_size {
                for &idx in &region {
                    disp[idx] = 0.0;
                }
            }
            next_label += 1;
        }
    }
}

impl DisparityAlgorithm for SemiGlobalMatcher {
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

        let left_grad = self.prefilter(left);
        let right_grad = self.prefilter(right);

        let cost_volume = self.compute_matching_costs(&left_grad, &right_grad, width, height);
        let aggregated = self.aggregate_costs(&cost_volume, width, height);

        let num_d = self.params.num_disparities;
        let mut disp = vec![0.0f32; width * height];

        for y in 0..height {
            for x in 0..width {
                let val = self.select_disparity(&aggregated, (y * width + x) * num_d);
                if !val.is_nan() {
                    disp[y * width + x] = val;
                }
            }
        }

        // Left/right consistency.
        if self.params.disp12_max_diff >= 0 {
            for y in 0..height {
                for x in 0..width {
                    let d = disp[y * width + x];
                    if d == 0.0 {
                        continue;
                    }
                    let rx = x as i32 - d.round() as i32;
                    if rx < 0 {
                        disp[y * width + x] = 0.0;
                        continue;
                    }
                    let rd = self.right_disparity(&aggregated, width, y, rx as usize);
                    if (d.round() as i32 - rd).abs() > self.params.disp12_max_diff {
                        disp[y * width + x] = 0.0;
                    }
                }
            }
        }

        self.filter_speckles(&mut disp, width, height);

        let mut disp_map = DisparityMap::new(width, height);
        let mut min_disp = f32::INFINITY;
        let mut max_disp = f32::NEG_INFINITY;
        for y in 0..height {
            for x in 0..width {
                let v = disp[y * width + x];
                disp_map.put(x, y, v);
                if v > max_disp {
                    max_disp = v;
                }
                if v < min_disp {
                    min_disp = v;
                }
            }
        }
        if min_disp.is_finite() {
            disp_map.min_disp = Some(min_disp);
            disp_map.max_disp = Some(max_disp);
        }

        Ok(disp_map)
    }

    fn name(&self) -> &'static str {
        "SGBM"
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params(min_d: usize, num_d: usize) -> Params {
        Params {
            min_disparity: min_d,
            num_disparities: num_d,
            block_size: 3,
            p1: 10,
            p2: 120,
            disp12_max_diff: 1,
            pre_filter_cap: 16,
            uniqueness_ratio: 0,
            speckle_window_size: 0,
            speckle_range: 20.0,
        }
    }

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
        let shift = 5u32;
        let (left, right) = shifted_pair(48, 24, shift);
        let mut matcher = SemiGlobalMatcher::new(test_params(0, 16)).unwrap();
        let map = matcher.compute(&left, &right).unwrap();

        let mut hits = 0;
        let mut total = 0;
        for y in 6..18usize {
            for x in 20..40usize {
                total += 1;
                if (map.get(x, y) - shift as f32).abs() <= 1.0 {
                    hits += 1;
                }
            }
        }
        assert!(hits * 10 >= total * 8, "only {hits}/{total} within 1 px");
    }

    #[test]
    fn speckle_filter_removes_small_regions() {
        let matcher = SemiGlobalMatcher::new(Params {
            speckle_window_size: 10,
            speckle_range: 2.0,
            ..test_params(0, 16)
        })
        .unwrap();

        let mut disp = vec![0.0f32; 20 * 20];
        // A 3 pixel island surrounded by zeros.
        disp[5 * 20 + 5] = 8.0;
        disp[5 * 20 + 6] = 8.5;
        disp[6 * 20 + 5] = 7.5;
        // A large block that must survive.
        for y in 10..16 {
            for x in 10..16 {
                disp[y * 20 + x] = 4.0;
            }
        }

        matcher.filter_speckles(&mut disp, 20, 20);
        assert_eq!(disp[5 * 20 + 5], 0.0);
        assert_eq!(disp[5 * 20 + 6], 0.0);
        assert_eq!(disp[12 * 20 + 12], 4.0);
    }

    #[test]
    fn prefilter_is_capped() {
        let matcher = SemiGlobalMatcher::new(test_params(0, 16)).unwrap();
        let img = GrayImage::from_fn(8, 8, |x, _| image::Luma([if x < 4 { 0 } else { 255 }]));
        let grad = matcher.prefilter(&img);
        assert!(grad.iter().all(|&g| g.abs() <= 16));
        // The step edge should saturate the cap.
        assert_eq!(grad[3 * 8 + 4].abs(), 16);
    }

    #[test]
    fn rejects_p2_not_above_p1() {
        let mut p = test_params(0, 16);
        p.p2 = p.p1;
        assert!(SemiGlobalMatcher::new(p).is_err());
    }

    #[test]
    fn default_params_match_preset() {
        let p = Params::default();
        assert_eq!(p.min_disparity, 12);
        assert_eq!(p.num_disparities, 144);
        assert_eq!(p.p1, 600);
        assert_eq!(p.p2, 2400);
        assert_eq!(p.speckle_window_size, 150);
    }
}
