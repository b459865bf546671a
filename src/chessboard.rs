//! # Checkerboard corner detection
//!
//! Locates the interior corners of a checkerboard calibration pattern: Harris corner
//! response, non-maximum suppression, grid assignment of the strongest candidates via
//! PCA axes and 1-D k-means, then iterative sub-pixel refinement. Corners come back in
//! a fixed grid traversal (the longer board axis running fastest) so left/right
//! detections and the synthetic object points correspond point-for-point.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_cross_mut;
use nalgebra::{Matrix2, Point2, SymmetricEigen, Vector2};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Sub-pixel refinement termination: at most this many iterations...
pub const SUBPIX_MAX_ITERS: usize = 30;

/// ...or a corner movement below this many pixels.
pub const SUBPIX_EPS: f64 = 0.001;

const SUBPIX_WIN_RADIUS: usize = 5;
const HARRIS_K: f64 = 0.04;

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Detect checkerboard corners in a grayscale image.
///
/// `pattern_size` is the (rows, cols) interior corner count. On success exactly
/// `rows * cols` refined corners are returned in board order; any shortfall is an
/// error, never a partial result.
pub fn find_chessboard_corners(
    image: &GrayImage,
    pattern_size: (usize, usize),
) -> Result<Vec<Point2<f64>>> {
    let (rows, cols) = pattern_size;
    let need = rows * cols;
    if rows < 2 || cols < 2 {
        return Err(Error::Chessboard(
            "pattern size must be at least 2x2".into(),
        ));
    }
    if image.width() < 8 || image.height() < 8 {
        return Err(Error::Chessboard(
            "image too small for chessboard detection".into(),
        ));
    }

    let (response, width, height) = harris_response(image, HARRIS_K, 1);
    let max_r = response
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max)
        .max(0.0);
    if max_r <= 0.0 {
        return Err(Error::Chessboard("no corner response in image".into()));
    }

    let mut cands = non_max_suppression(&response, width, height, max_r * 0.01);
    if cands.len() < need {
        return Err(Error::Chessboard(format!(
            "insufficient corner candidates: found {}, need {need}",
            cands.len()
        )));
    }

    // Strongest candidates first; keep a margin for grid assignment to choose from.
    cands.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    cands.truncate((need * 10).max(need));

    let mut ordered = assign_grid(&cands, pattern_size)?;
    refine_subpix(
        image,
        &mut ordered,
        SUBPIX_WIN_RADIUS,
        SUBPIX_MAX_ITERS,
        SUBPIX_EPS,
    );
    Ok(ordered)
}

/// Refine corner positions to sub-pixel accuracy by gradient-weighted averaging,
/// stopping after `max_iters` iterations or once the shift drops below `eps` pixels.
pub fn refine_subpix(
    image: &GrayImage,
    corners: &mut [Point2<f64>],
    win_radius: usize,
    max_iters: usize,
    eps: f64,
) {
    let w = image.width() as i32;
    let h = image.height() as i32;
    for p in corners.iter_mut() {
        let mut x = p.x;
        let mut y = p.y;
        for _ in 0..max_iters {
            let mut sw = 0.0f64;
            let mut sx = 0.0f64;
            let mut sy = 0.0f64;
            let cx = x.round() as i32;
            let cy = y.round() as i32;
            for dy in -(win_radius as i32)..=(win_radius as i32) {
                for dx in -(win_radius as i32)..=(win_radius as i32) {
                    let xx = cx + dx;
                    let yy = cy + dy;
                    if xx <= 0 || yy <= 0 || xx >= w - 1 || yy >= h - 1 {
                        continue;
                    }
                    let gx = (image.get_pixel((xx + 1) as u32, yy as u32)[0] as f64
                        - image.get_pixel((xx - 1) as u32, yy as u32)[0] as f64)
                        * 0.5;
                    let gy = (image.get_pixel(xx as u32, (yy + 1) as u32)[0] as f64
                        - image.get_pixel(xx as u32, (yy - 1) as u32)[0] as f64)
                        * 0.5;
                    let wgt = (gx * gx + gy * gy).sqrt();
                    if wgt <= 1e-9 {
                        continue;
                    }
                    sw += wgt;
                    sx += wgt * xx as f64;
                    sy += wgt * yy as f64;
                }
            }
            if sw <= 1e-9 {
                break;
            }
            let nx = sx / sw;
            let ny = sy / sw;
            let shift = ((nx - x) * (nx - x) + (ny - y) * (ny - y)).sqrt();
            x = nx;
            y = ny;
            if shift < eps {
                break;
            }
        }
        p.x = x.clamp(0.0, (image.width() - 1) as f64);
        p.y = y.clamp(0.0, (image.height() - 1) as f64);
    }
}

/// Draw detected corners onto an RGB copy of the source image.
///
/// Display-only artifact mirroring the capture review overlay; nothing in the
/// pipeline persists it.
pub fn draw_corners(image: &GrayImage, corners: &[Point2<f64>]) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, px) in image.enumerate_pixels() {
        let v = px[0];
        out.put_pixel(x, y, Rgb([v, v, v]));
    }
    for c in corners {
        draw_cross_mut(
            &mut out,
            Rgb([255, 0, 0]),
            c.x.round() as i32,
            c.y.round() as i32,
        );
    }
    out
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Harris corner response over the whole image.
fn harris_response(image: &GrayImage, k: f64, win_radius: usize) -> (Vec<f64>, usize, usize) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut ix = vec![0.0f64; width * height];
    let mut iy = vec![0.0f64; width * height];

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = image.get_pixel((x + 1) as u32, y as u32)[0] as f64
                - image.get_pixel((x - 1) as u32, y as u32)[0] as f64;
            let gy = image.get_pixel(x as u32, (y + 1) as u32)[0] as f64
                - image.get_pixel(x as u32, (y - 1) as u32)[0] as f64;
            ix[y * width + x] = gx * 0.5;
            iy[y * width + x] = gy * 0.5;
        }
    }

    let mut resp = vec![0.0f64; width * height];
    let r = win_radius as i32;
    for y in win_radius..(height - win_radius) {
        for x in win_radius..(width - win_radius) {
            let mut sxx = 0.0;
            let mut sxy = 0.0;
            let mut syy = 0.0;
            for dy in -r..=r {
                for dx in -r..=r {
                    let xx = (x as i32 + dx) as usize;
                    let yy = (y as i32 + dy) as usize;
                    let gx = ix[yy * width + xx];
                    let gy = iy[yy * width + xx];
                    sxx += gx * gx;
                    sxy += gx * gy;
                    syy += gy * gy;
                }
            }
            let det = sxx * syy - sxy * sxy;
            let trace = sxx + syy;
            resp[y * width + x] = det - k * trace * trace;
        }
    }
    (resp, width, height)
}

/// Keep only local maxima of the response above `threshold`, as (x, y, response).
fn non_max_suppression(
    response: &[f64],
    width: usize,
    height: usize,
    threshold: f64,
) -> Vec<(f64, f64, f64)> {
    let mut out = Vec::new();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let r = response[y * width + x];
            if r <= threshold {
                continue;
            }
            let mut is_max = true;
            'win: for yy in (y - 1)..=(y + 1) {
                for xx in (x - 1)..=(x + 1) {
                    if (xx != x || yy != y) && response[yy * width + xx] > r {
                        is_max = false;
                        break 'win;
                    }
                }
            }
            if is_max {
                out.push((x as f64, y as f64, r));
            }
        }
    }
    out
}

/// Assign corner candidates to the expected board grid.
///
/// Candidates are projected onto the two principal axes of their spread, clustered
/// into `cols`/`rows` 1-D bins, and each grid cell takes the nearest unused candidate.
fn assign_grid(
    candidates: &[(f64, f64, f64)],
    pattern_size: (usize, usize),
) -> Result<Vec<Point2<f64>>> {
    let (rows, cols) = pattern_size;
    let points: Vec<Vector2<f64>> = candidates
        .iter()
        .map(|(x, y, _)| Vector2::new(*x, *y))
        .collect();

    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / points.len() as f64;
    let mut cov = Matrix2::<f64>::zeros();
    for p in &points {
        let d = p - mean;
        cov += d * d.transpose();
    }
    cov /= points.len() as f64;
    let eig = SymmetricEigen::new(cov);
    let (i0, i1) = if eig.eigenvalues[0] >= eig.eigenvalues[1] {
        (0usize, 1usize)
    } else {
        (1usize, 0usize)
    };
    let e0 = eig.eigenvectors.column(i0).into_owned();
    let e1 = eig.eigenvectors.column(i1).into_owned();

    let uv: Vec<(f64, f64)> = points
        .iter()
        .map(|p| {
            let d = p - mean;
            (d.dot(&e0), d.dot(&e1))
        })
        .collect();
    let u_vals: Vec<f64> = uv.iter().map(|(u, _)| *u).collect();
    let v_vals: Vec<f64> = uv.iter().map(|(_, v)| *v).collect();

    // The longer principal axis carries the larger corner count.
    let (ku, kv) = if cols >= rows { (cols, rows) } else { (rows, cols) };
    let mut u_centers = kmeans_1d(&u_vals, ku, 30);
    let mut v_centers = kmeans_1d(&v_vals, kv, 30);
    u_centers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v_centers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut used = vec![false; points.len()];
    let mut out = Vec::with_capacity(rows * cols);
    for vc in &v_centers {
        for uc in &u_centers {
            let mut best = None;
            let mut best_cost = f64::INFINITY;
            for (i, (u, v)) in uv.iter().enumerate() {
                if used[i] {
                    continue;
                }
                let du = u - uc;
                let dv = v - vc;
                let cost = du * du + dv * dv;
                if cost < best_cost {
                    best_cost = cost;
                    best = Some(i);
                }
            }
            let idx = best
                .ok_or_else(|| Error::Chessboard("failed to assign all corners".into()))?;
            used[idx] = true;
            out.push(Point2::new(points[idx][0], points[idx][1]));
        }
    }
    Ok(out)
}

/// 1-D k-means used to recover the regular grid lines along one axis.
fn kmeans_1d(values: &[f64], k: usize, iters: usize) -> Vec<f64> {
    let min_v = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_v = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if k == 1 || (max_v - min_v).abs() < 1e-12 {
        return vec![0.5 * (min_v + max_v); k];
    }

    let mut centers = (0..k)
        .map(|i| min_v + (i as f64) * (max_v - min_v) / (k as f64 - 1.0))
        .collect::<Vec<_>>();

    for _ in 0..iters {
        let mut sums = vec![0.0f64; k];
        let mut cnts = vec![0usize; k];
        for &v in values {
            let mut bi = 0usize;
            let mut bd = (v - centers[0]).abs();
            for (i, &c) in centers.iter().enumerate().skip(1) {
                let d = (v - c).abs();
                if d < bd {
                    bd = d;
                    bi = i;
                }
            }
            sums[bi] += v;
            cnts[bi] += 1;
        }
        for i in 0..k {
            if cnts[i] > 0 {
                centers[i] = sums[i] / cnts[i] as f64;
            }
        }
    }
    centers
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
