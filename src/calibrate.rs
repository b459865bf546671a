//! # Single-camera calibration
//!
//! Planar (Zhang-style) camera calibration from checkerboard correspondences: DLT
//! homographies per view, closed-form intrinsics from the homography constraint
//! system, per-view extrinsics from homography decomposition, and an iterative
//! distortion refinement with tangential terms held at zero.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use nalgebra::{DMatrix, Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Pinhole intrinsic parameters plus the calibration image dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

/// Brown-Conrady lens distortion coefficients.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

/// Rigid transform from board space into camera space for one view.
#[derive(Debug, Clone, Copy)]
pub struct Pose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Result of calibrating one camera over the full correspondence set.
#[derive(Debug, Clone)]
pub struct CameraCalibration {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    pub extrinsics: Vec<Pose>,
    pub rms_reprojection_error: f64,
}

/// Correspondences accumulated over the calibration image set.
///
/// One entry per pair in which detection succeeded on BOTH images; the board's
/// synthetic 3-D points are repeated per view so view counts always agree.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    pub object: Vec<Vec<Point3<f64>>>,
    pub left: Vec<Vec<Point2<f64>>>,
    pub right: Vec<Vec<Point2<f64>>>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Intrinsics {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }
}

impl Distortion {
    /// Apply distortion to normalised camera coordinates.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (x * radial + dx, y * radial + dy)
    }
}

impl Correspondences {
    /// Append one successfully detected pair.
    pub fn push_pair(
        &mut self,
        board: &[Point3<f64>],
        left: Vec<Point2<f64>>,
        right: Vec<Point2<f64>>,
    ) {
        self.object.push(board.to_vec());
        self.left.push(left);
        self.right.push(right);
    }

    pub fn len(&self) -> usize {
        self.object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object.is_empty()
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Synthetic 3-D reference points for the checkerboard: integer grid, z = 0.
///
/// The traversal runs the longer board axis fastest, matching the order the corner
/// detector emits, so `object[i]` always corresponds to `corners[i]`.
pub fn generate_object_points(pattern_size: (usize, usize)) -> Vec<Point3<f64>> {
    let (rows, cols) = pattern_size;
    let major = rows.max(cols);
    let minor = rows.min(cols);
    let mut points = Vec::with_capacity(rows * cols);
    for j in 0..minor {
        for i in 0..major {
            points.push(Point3::new(i as f64, j as f64, 0.0));
        }
    }
    points
}

/// Calibrate a single camera from planar views.
///
/// Needs at least 3 views with at least 4 correspondences each; all object points
/// must lie in the z = 0 plane.
pub fn calibrate_camera(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
) -> Result<CameraCalibration> {
    if object_points.len() != image_points.len() || object_points.len() < 3 {
        return Err(Error::Calibration(format!(
            "need at least 3 matched views, got {}",
            object_points.len()
        )));
    }

    let mut homographies = Vec::with_capacity(object_points.len());
    for (obj, img) in object_points.iter().zip(image_points.iter()) {
        if obj.len() != img.len() || obj.len() < 4 {
            return Err(Error::Calibration(
                "each view needs at least 4 correspondences".into(),
            ));
        }
        if obj.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(Error::Calibration(
                "object points must be planar (z = 0)".into(),
            ));
        }
        let obj2d: Vec<Point2<f64>> = obj.iter().map(|p| Point2::new(p.x, p.y)).collect();
        homographies.push(estimate_homography_dlt(&obj2d, img)?);
    }

    let k = intrinsics_from_homographies(&homographies)?;
    let intrinsics = Intrinsics {
        fx: k[(0, 0)],
        fy: k[(1, 1)],
        cx: k[(0, 2)],
        cy: k[(1, 2)],
        width: image_size.0,
        height: image_size.1,
    };

    let k_inv = intrinsics.inverse_matrix();
    let mut extrinsics = Vec::with_capacity(homographies.len());
    for h in &homographies {
        extrinsics.push(pose_from_homography(&k_inv, h)?);
    }

    let distortion = refine_distortion(
        &intrinsics,
        &extrinsics,
        object_points,
        image_points,
        5,
    )?;

    let rms = rms_reprojection_error(
        &intrinsics,
        &distortion,
        &extrinsics,
        object_points,
        image_points,
    )?;

    let calib = CameraCalibration {
        intrinsics,
        distortion,
        extrinsics,
        rms_reprojection_error: rms,
    };
    if !calib_is_finite(&calib) {
        return Err(Error::Calibration(
            "calibration produced non-finite parameters".into(),
        ));
    }
    Ok(calib)
}

/// Project board points into the image through a pose, intrinsics and distortion.
pub fn project_points(
    points: &[Point3<f64>],
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    pose: &Pose,
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| {
            let pc = pose.rotation * p.coords + pose.translation;
            if pc[2].abs() <= 1e-12 {
                return Point2::new(f64::NAN, f64::NAN);
            }
            let (xd, yd) = distortion.apply(pc[0] / pc[2], pc[1] / pc[2]);
            Point2::new(
                intrinsics.fx * xd + intrinsics.cx,
                intrinsics.fy * yd + intrinsics.cy,
            )
        })
        .collect()
}

/// Root-mean-square reprojection error over all views.
pub fn rms_reprojection_error(
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    extrinsics: &[Pose],
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
) -> Result<f64> {
    let mut sq_sum = 0.0f64;
    let mut count = 0usize;
    for ((pose, obj), img) in extrinsics
        .iter()
        .zip(object_points.iter())
        .zip(image_points.iter())
    {
        let projected = project_points(obj, intrinsics, distortion, pose);
        for (pred, seen) in projected.iter().zip(img.iter()) {
            if !pred.x.is_finite() || !pred.y.is_finite() {
                continue;
            }
            let du = pred.x - seen.x;
            let dv = pred.y - seen.y;
            sq_sum += du * du + dv * dv;
            count += 1;
        }
    }
    if count == 0 {
        return Err(Error::Calibration("no valid reprojections".into()));
    }
    Ok((sq_sum / count as f64).sqrt())
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Homography by Direct Linear Transform with Hartley normalisation.
fn estimate_homography_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>> {
    if src.len() != dst.len() || src.len() < 4 {
        return Err(Error::Calibration(
            "homography needs at least 4 paired points".into(),
        ));
    }

    let (src_n, ts) = normalize_points(src)?;
    let (dst_n, td) = normalize_points(dst)?;
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let x = src_n[i].x;
        let y = src_n[i].y;
        let u = dst_n[i].x;
        let v = dst_n[i].y;
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(true, true);
    let vt = svd
        .v_t
        .ok_or_else(|| Error::Calibration("SVD failed for homography".into()))?;
    let h = vt.row(vt.nrows() - 1);
    let hn = Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], h[8],
    );
    let mut out = td.try_inverse().unwrap_or_else(Matrix3::identity) * hn * ts;
    if out[(2, 2)].abs() > 1e-12 {
        out /= out[(2, 2)];
    }
    Ok(out)
}

/// Hartley point normalisation: zero centroid, mean distance sqrt(2).
fn normalize_points(points: &[Point2<f64>]) -> Result<(Vec<Point2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return Err(Error::Calibration("cannot normalise empty point set".into()));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - mean_x).powi(2) + (p.y - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let scale = if mean_dist.abs() > 1e-18 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let normalized = points
        .iter()
        .map(|p| Point2::new((p.x - mean_x) * scale, (p.y - mean_y) * scale))
        .collect();

    let t = Matrix3::new(
        scale,
        0.0,
        -mean_x * scale,
        0.0,
        scale,
        -mean_y * scale,
        0.0,
        0.0,
        1.0,
    );
    Ok((normalized, t))
}

/// Closed-form intrinsics from the planar homography constraints (Zhang).
fn intrinsics_from_homographies(homographies: &[Matrix3<f64>]) -> Result<Matrix3<f64>> {
    if homographies.len() < 3 {
        return Err(Error::Calibration(
            "need at least 3 homographies for intrinsics".into(),
        ));
    }

    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (i, h) in homographies.iter().enumerate() {
        let v12 = v_ij(h, 0, 1);
        let v11 = v_ij(h, 0, 0);
        let v22 = v_ij(h, 1, 1);
        for j in 0..6 {
            v[(2 * i, j)] = v12[j];
            v[(2 * i + 1, j)] = v11[j] - v22[j];
        }
    }

    let svd = v.svd(true, true);
    let vt = svd
        .v_t
        .ok_or_else(|| Error::Calibration("SVD failed for intrinsics".into()))?;
    let b = vt.row(vt.nrows() - 1);
    let mut b11 = b[0];
    let mut b12 = b[1];
    let mut b22 = b[2];
    let mut b13 = b[3];
    let mut b23 = b[4];
    let mut b33 = b[5];

    let mut denom = b11 * b22 - b12 * b12;
    if denom.abs() < 1e-18 || b11.abs() < 1e-18 {
        return Err(Error::Calibration("degenerate calibration system".into()));
    }

    let mut v0 = (b12 * b13 - b11 * b23) / denom;
    let mut lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;

    // Nullspace sign is arbitrary; flip once if needed.
    if lambda <= 0.0 {
        b11 = -b11;
        b12 = -b12;
        b22 = -b22;
        b13 = -b13;
        b23 = -b23;
        b33 = -b33;
        denom = b11 * b22 - b12 * b12;
        if denom.abs() < 1e-18 || b11.abs() < 1e-18 {
            return Err(Error::Calibration("degenerate calibration system".into()));
        }
        v0 = (b12 * b13 - b11 * b23) / denom;
        lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    }
    if lambda <= 0.0 {
        return Err(Error::Calibration("invalid focal solution".into()));
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    Ok(Matrix3::new(alpha, gamma, u0, 0.0, beta, v0, 0.0, 0.0, 1.0))
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> [f64; 6] {
    [
        h[(0, i)] * h[(0, j)],
        h[(0, i)] * h[(1, j)] + h[(1, i)] * h[(0, j)],
        h[(1, i)] * h[(1, j)],
        h[(2, i)] * h[(0, j)] + h[(0, i)] * h[(2, j)],
        h[(2, i)] * h[(1, j)] + h[(1, i)] * h[(2, j)],
        h[(2, i)] * h[(2, j)],
    ]
}

/// Decompose a homography into a board pose given inverse intrinsics.
fn pose_from_homography(k_inv: &Matrix3<f64>, h: &Matrix3<f64>) -> Result<Pose> {
    let r1_raw = k_inv * h.column(0).into_owned();
    let r2_raw = k_inv * h.column(1).into_owned();
    let t_raw = k_inv * h.column(2).into_owned();
    let mut scale = 1.0 / r1_raw.norm().max(1e-18);
    // The DLT nullspace sign is arbitrary; the board must sit in front of the
    // camera, which fixes it.
    if t_raw[2] * scale < 0.0 {
        scale = -scale;
    }

    let r1 = r1_raw * scale;
    let r2 = r2_raw * scale;
    let r3 = r1.cross(&r2);
    let mut r = Matrix3::from_columns(&[r1, r2, r3]);

    // Project onto SO(3).
    let svd = r.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::Calibration("SVD U missing for pose".into()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| Error::Calibration("SVD V^T missing for pose".into()))?;
    r = u * vt;
    if r.determinant() < 0.0 {
        r = -r;
    }

    let t = t_raw * scale;

    Ok(Pose {
        rotation: r,
        translation: t,
    })
}

/// Iterative refinement of the radial coefficients with a numerical Jacobian.
///
/// Tangential distortion is held at zero throughout, matching the zero-tangent
/// calibration constraint used for these camera rigs.
fn refine_distortion(
    intrinsics: &Intrinsics,
    extrinsics: &[Pose],
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    max_iters: usize,
) -> Result<Distortion> {
    let mut distortion = Distortion::default();
    let total_pts: usize = object_points.iter().map(|v| v.len()).sum();
    if total_pts < 10 {
        return Ok(distortion);
    }

    // Free parameters are k1, k2, k3 only.
    for _ in 0..max_iters {
        let mut j = DMatrix::<f64>::zeros(2 * total_pts, 3);
        let mut r = DMatrix::<f64>::zeros(2 * total_pts, 1);

        let eps = 1e-7;
        let mut row = 0;
        for (i, pose) in extrinsics.iter().enumerate() {
            let pred = project_points(&object_points[i], intrinsics, &distortion, pose);
            let perturbed: Vec<Vec<Point2<f64>>> = (0..3)
                .map(|k| {
                    let mut d = distortion;
                    match k {
                        0 => d.k1 += eps,
                        1 => d.k2 += eps,
                        _ => d.k3 += eps,
                    }
                    project_points(&object_points[i], intrinsics, &d, pose)
                })
                .collect();

            for (n, (p, seen)) in pred.iter().zip(image_points[i].iter()).enumerate() {
                if !p.x.is_finite() {
                    continue;
                }
                r[(row, 0)] = p.x - seen.x;
                r[(row + 1, 0)] = p.y - seen.y;
                for k in 0..3 {
                    let q = perturbed[k][n];
                    j[(row, k)] = (q.x - p.x) / eps;
                    j[(row + 1, k)] = (q.y - p.y) / eps;
                }
                row += 2;
            }
        }

        let jt = j.transpose();
        let h = &jt * &j;
        let g = &jt * &r;
        let delta = match h.lu().solve(&g) {
            Some(d) => d,
            None => break,
        };

        distortion.k1 -= delta[(0, 0)];
        distortion.k2 -= delta[(1, 0)];
        distortion.k3 -= delta[(2, 0)];

        if delta.norm() < 1e-9 {
            break;
        }
    }

    Ok(distortion)
}

fn calib_is_finite(calib: &CameraCalibration) -> bool {
    let k = &calib.intrinsics;
    let ok = k.fx.is_finite()
        && k.fy.is_finite()
        && k.cx.is_finite()
        && k.cy.is_finite()
        && k.fx.abs() > 1e-12
        && k.fy.abs() > 1e-12
        && calib.rms_reprojection_error.is_finite();
    ok && calib.extrinsics.iter().all(|p| {
        p.rotation.iter().all(|v| v.is_finite()) && p.translation.iter().all(|v| v.is_finite())
    })
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn synthetic_views(
        k: &Intrinsics,
        poses: &[Pose],
        board: &[Point3<f64>],
    ) -> (Vec<Vec<Point3<f64>>>, Vec<Vec<Point2<f64>>>) {
        let dist = Distortion::default();
        let mut objs = Vec::new();
        let mut imgs = Vec::new();
        for pose in poses {
            objs.push(board.to_vec());
            imgs.push(project_points(board, k, &dist, pose));
        }
        (objs, imgs)
    }

    fn tilted_pose(rx: f64, ry: f64, tx: f64, ty: f64, tz: f64) -> Pose {
        let r = Rotation3::from_euler_angles(rx, ry, 0.0);
        Pose {
            rotation: *r.matrix(),
            translation: Vector3::new(tx, ty, tz),
        }
    }

    #[test]
    fn object_points_form_unit_grid() {
        let pts = generate_object_points((6, 9));
        assert_eq!(pts.len(), 54);
        assert!(pts.iter().all(|p| p.z == 0.0));
        // Longer axis runs fastest.
        assert_eq!(pts[1], Point3::new(1.0, 0.0, 0.0));
        assert_eq!(pts[9], Point3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn recovers_synthetic_intrinsics() {
        let k = Intrinsics {
            fx: 800.0,
            fy: 780.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        };
        let board = generate_object_points((6, 9));
        let poses = [
            tilted_pose(0.2, 0.1, -4.0, -2.5, 14.0),
            tilted_pose(-0.25, 0.15, -3.5, -3.0, 15.0),
            tilted_pose(0.1, -0.3, -4.5, -2.0, 13.0),
            tilted_pose(-0.15, -0.2, -4.0, -2.8, 16.0),
            tilted_pose(0.3, 0.25, -3.8, -2.2, 15.5),
        ];
        let (objs, imgs) = synthetic_views(&k, &poses, &board);

        let calib = calibrate_camera(&objs, &imgs, (640, 480)).unwrap();
        assert!((calib.intrinsics.fx - k.fx).abs() / k.fx < 0.05);
        assert!((calib.intrinsics.fy - k.fy).abs() / k.fy < 0.05);
        assert!((calib.intrinsics.cx - k.cx).abs() < 25.0);
        assert!((calib.intrinsics.cy - k.cy).abs() < 25.0);
        assert!(calib.rms_reprojection_error < 1.0);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let k = Intrinsics {
            fx: 700.0,
            fy: 700.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        };
        let board = generate_object_points((5, 7));
        let poses = [
            tilted_pose(0.2, 0.1, -3.0, -2.0, 12.0),
            tilted_pose(-0.2, 0.2, -3.5, -2.5, 13.0),
            tilted_pose(0.15, -0.25, -2.5, -2.0, 14.0),
        ];
        let (objs, imgs) = synthetic_views(&k, &poses, &board);

        let a = calibrate_camera(&objs, &imgs, (640, 480)).unwrap();
        let b = calibrate_camera(&objs, &imgs, (640, 480)).unwrap();
        assert_eq!(a.intrinsics.fx, b.intrinsics.fx);
        assert_eq!(a.intrinsics.cy, b.intrinsics.cy);
        assert_eq!(a.rms_reprojection_error, b.rms_reprojection_error);
    }

    #[test]
    fn too_few_views_is_an_error() {
        let board = generate_object_points((4, 4));
        let objs = vec![board.clone(); 2];
        let imgs = vec![
            board.iter().map(|p| Point2::new(p.x, p.y)).collect(),
            board.iter().map(|p| Point2::new(p.x, p.y)).collect(),
        ];
        assert!(calibrate_camera(&objs, &imgs, (100, 100)).is_err());
    }
}
