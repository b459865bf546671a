//! # Stereo rig calibration and rectification geometry
//!
//! Joint calibration of a left/right camera pair from shared checkerboard views.
//! Each camera is calibrated on its own and held fixed; the relative pose is the
//! average of the per-view relative transforms, projected back onto SO(3). From
//! the relative pose this module derives the essential and fundamental matrices,
//! the rectifying rotations and projections, and the per-camera remap tables that
//! turn raw captures into row-aligned rectified images.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Matrix4, Rotation3, Vector3};

use crate::calibrate::{
    calibrate_camera, CameraCalibration, Distortion, Intrinsics, Pose,
};
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Iteration cap for the relative pose refinement.
const STEREO_MAX_ITERS: usize = 100;

/// Refinement stops once the cost improves by less than this.
const STEREO_EPS: f64 = 1e-5;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Full stereo rig calibration.
#[derive(Debug, Clone)]
pub struct StereoCalibration {
    pub left: CameraCalibration,
    pub right: CameraCalibration,
    /// Transform from left camera coordinates into right camera coordinates.
    pub relative: Pose,
    pub essential_matrix: Matrix3<f64>,
    pub fundamental_matrix: Matrix3<f64>,
}

/// Rectifying rotations, projections and the disparity-to-depth matrix.
#[derive(Debug, Clone)]
pub struct RectifyMatrices {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    pub q: Matrix4<f64>,
}

/// Pixel lookup tables mapping rectified coordinates back to raw coordinates.
#[derive(Debug, Clone)]
pub struct RectifyMaps {
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

/// The complete rig model produced by calibration, immutable once built.
///
/// Holds the per-camera parameters, the relative geometry, the rectification
/// matrices and the remap table per camera.
#[derive(Debug, Clone)]
pub struct CameraModel {
    pub width: u32,
    pub height: u32,
    pub left_intrinsics: Intrinsics,
    pub right_intrinsics: Intrinsics,
    pub left_distortion: Distortion,
    pub right_distortion: Distortion,
    /// Rodrigues vector of each camera's first-view rotation.
    pub rot_left: Vector3<f64>,
    pub rot_right: Vector3<f64>,
    pub relative: Pose,
    pub essential_matrix: Matrix3<f64>,
    pub fundamental_matrix: Matrix3<f64>,
    pub rect: RectifyMatrices,
    pub left_maps: RectifyMaps,
    pub right_maps: RectifyMaps,
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Calibrate a stereo rig from matched planar views.
///
/// Both cameras see the same board in every view, so the per-view relative
/// transforms should agree; averaging them smooths detection noise.
pub fn stereo_calibrate(
    object_points: &[Vec<nalgebra::Point3<f64>>],
    left_points: &[Vec<nalgebra::Point2<f64>>],
    right_points: &[Vec<nalgebra::Point2<f64>>],
    image_size: (u32, u32),
) -> Result<StereoCalibration> {
    if object_points.len() != left_points.len() || object_points.len() != right_points.len() {
        return Err(Error::Calibration(
            "stereo calibration expects matching view counts".into(),
        ));
    }

    let left = calibrate_camera(object_points, left_points, image_size)?;
    let right = calibrate_camera(object_points, right_points, image_size)?;
    debug!(
        "per-camera RMS: left {:.4} px, right {:.4} px",
        left.rms_reprojection_error, right.rms_reprojection_error
    );

    let n = left.extrinsics.len().min(right.extrinsics.len());
    if n == 0 {
        return Err(Error::Calibration("no usable extrinsics".into()));
    }

    let mut r_sum = Matrix3::<f64>::zeros();
    let mut t_sum = Vector3::zeros();
    for i in 0..n {
        let r_l = left.extrinsics[i].rotation;
        let t_l = left.extrinsics[i].translation;
        let r_r = right.extrinsics[i].rotation;
        let t_r = right.extrinsics[i].translation;

        let r_rel = r_r * r_l.transpose();
        let t_rel = t_r - r_rel * t_l;
        r_sum += r_rel;
        t_sum += t_rel;
    }
    t_sum /= n as f64;

    let svd = r_sum.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::Calibration("SVD U missing for relative pose".into()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| Error::Calibration("SVD V^T missing for relative pose".into()))?;
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        r = -r;
    }

    let averaged = Pose {
        rotation: r,
        translation: t_sum,
    };
    let relative = refine_relative_pose(
        &averaged,
        &left.intrinsics,
        &right.intrinsics,
        left_points,
        right_points,
    );
    let essential_matrix = essential_from_pose(&relative);
    let fundamental_matrix =
        fundamental_from_essential(&essential_matrix, &left.intrinsics, &right.intrinsics);

    Ok(StereoCalibration {
        left,
        right,
        relative,
        essential_matrix,
        fundamental_matrix,
    })
}

/// Rectifying rotations and projections for a calibrated rig.
///
/// The new x axis follows the baseline so epipolar lines become image rows. Both
/// rectified projections share averaged focal lengths and principal point; `p2`
/// carries the `-fx * baseline` column that encodes the rig separation.
pub fn stereo_rectify(
    left_intrinsics: &Intrinsics,
    right_intrinsics: &Intrinsics,
    relative: &Pose,
) -> Result<RectifyMatrices> {
    // Orientation and position of the right camera in the left camera's frame.
    let rel_r = relative.rotation.transpose();
    let rel_t = -(relative.rotation.transpose() * relative.translation);
    let baseline = rel_t.norm();
    if baseline <= 1e-12 {
        return Err(Error::Geometry(
            "rectification requires a non-zero baseline".into(),
        ));
    }

    let ex = rel_t / baseline;
    let helper = if ex[2].abs() < 0.9 {
        Vector3::<f64>::new(0.0, 0.0, 1.0)
    } else {
        Vector3::<f64>::new(0.0, 1.0, 0.0)
    };
    let ey = helper.cross(&ex).normalize();
    let ez = ex.cross(&ey).normalize();
    let basis = Matrix3::from_columns(&[ex, ey, ez]);
    let r_rect = basis.transpose();

    let r1 = r_rect;
    let r2 = r_rect * rel_r;

    let fx = 0.5 * (left_intrinsics.fx + right_intrinsics.fx);
    let fy = 0.5 * (left_intrinsics.fy + right_intrinsics.fy);
    let cx = 0.5 * (left_intrinsics.cx + right_intrinsics.cx);
    let cy = 0.5 * (left_intrinsics.cy + right_intrinsics.cy);
    let tx = -fx * baseline;

    let p1 = Matrix3x4::new(
        fx, 0.0, cx, 0.0, //
        0.0, fy, cy, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    );
    let p2 = Matrix3x4::new(
        fx, 0.0, cx, tx, //
        0.0, fy, cy, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    );

    let mut q = Matrix4::<f64>::zeros();
    q[(0, 0)] = 1.0;
    q[(0, 3)] = -cx;
    q[(1, 1)] = 1.0;
    q[(1, 3)] = -cy;
    q[(2, 3)] = fx;
    q[(3, 2)] = -1.0 / tx;

    Ok(RectifyMatrices { r1, r2, p1, p2, q })
}

/// Remap table for one camera: for every rectified pixel, the raw source pixel.
///
/// Walks the rectified grid backwards through the new projection, the inverse
/// rectifying rotation and the lens distortion.
pub fn init_undistort_rectify_map(
    image_size: (u32, u32),
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    rectification: &Matrix3<f64>,
    new_projection: &Matrix3x4<f64>,
) -> Result<RectifyMaps> {
    let (width, height) = image_size;
    if width == 0 || height == 0 {
        return Err(Error::Geometry(
            "remap tables require a non-zero image size".into(),
        ));
    }

    let k_new = Matrix3::new(
        new_projection[(0, 0)],
        new_projection[(0, 1)],
        new_projection[(0, 2)],
        new_projection[(1, 0)],
        new_projection[(1, 1)],
        new_projection[(1, 2)],
        new_projection[(2, 0)],
        new_projection[(2, 1)],
        new_projection[(2, 2)],
    );
    let k_new_inv = k_new
        .try_inverse()
        .ok_or_else(|| Error::Geometry("rectified projection is singular".into()))?;
    let r_inv = rectification
        .try_inverse()
        .ok_or_else(|| Error::Geometry("rectifying rotation is singular".into()))?;

    let mut map_x = vec![0.0f32; (width * height) as usize];
    let mut map_y = vec![0.0f32; (width * height) as usize];

    for y in 0..height {
        let row = (y * width) as usize;
        for x in 0..width {
            let dst = Vector3::new(x as f64, y as f64, 1.0);
            let rectified_norm = k_new_inv * dst;
            let original_norm = r_inv * rectified_norm;
            if original_norm[2].abs() <= 1e-12 {
                continue;
            }

            let xn = original_norm[0] / original_norm[2];
            let yn = original_norm[1] / original_norm[2];
            let (xd, yd) = distortion.apply(xn, yn);

            map_x[row + x as usize] = (intrinsics.fx * xd + intrinsics.cx) as f32;
            map_y[row + x as usize] = (intrinsics.fy * yd + intrinsics.cy) as f32;
        }
    }

    Ok(RectifyMaps { map_x, map_y })
}

/// Rotation matrix to axis-angle (Rodrigues) vector.
pub fn rotation_to_rodrigues(r: &Matrix3<f64>) -> Vector3<f64> {
    let trace = r[(0, 0)] + r[(1, 1)] + r[(2, 2)];
    let cos_theta = ((trace - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();

    let axis_raw = Vector3::new(
        r[(2, 1)] - r[(1, 2)],
        r[(0, 2)] - r[(2, 0)],
        r[(1, 0)] - r[(0, 1)],
    );

    if theta.abs() < 1e-12 {
        return Vector3::zeros();
    }
    let sin_theta = theta.sin();
    if sin_theta.abs() < 1e-9 {
        // Near pi the antisymmetric part vanishes; recover the axis magnitudes
        // from the diagonal and the relative signs from the off-diagonals. The
        // overall sign is ambiguous at pi, either choice is valid.
        let x = ((r[(0, 0)] + 1.0) * 0.5).max(0.0).sqrt();
        let y = ((r[(1, 1)] + 1.0) * 0.5).max(0.0).sqrt();
        let z = ((r[(2, 2)] + 1.0) * 0.5).max(0.0).sqrt();
        let y = if r[(0, 1)] < 0.0 { -y } else { y };
        let z = if r[(0, 2)] < 0.0 { -z } else { z };
        let axis = Vector3::new(x, y, z);
        let norm = axis.norm();
        if norm < 1e-12 {
            return Vector3::zeros();
        }
        return axis / norm * theta;
    }

    axis_raw * (theta / (2.0 * sin_theta))
}

impl CameraModel {
    /// Build the full rig model, including the remap tables, from a calibration.
    pub fn from_calibration(calib: &StereoCalibration) -> Result<Self> {
        let rect = stereo_rectify(
            &calib.left.intrinsics,
            &calib.right.intrinsics,
            &calib.relative,
        )?;

        let width = calib.left.intrinsics.width;
        let height = calib.left.intrinsics.height;
        let left_maps = init_undistort_rectify_map(
            (width, height),
            &calib.left.intrinsics,
            &calib.left.distortion,
            &rect.r1,
            &rect.p1,
        )?;
        let right_maps = init_undistort_rectify_map(
            (width, height),
            &calib.right.intrinsics,
            &calib.right.distortion,
            &rect.r2,
            &rect.p2,
        )?;

        let rot_left = calib
            .left
            .extrinsics
            .first()
            .map(|p| rotation_to_rodrigues(&p.rotation))
            .unwrap_or_else(Vector3::zeros);
        let rot_right = calib
            .right
            .extrinsics
            .first()
            .map(|p| rotation_to_rodrigues(&p.rotation))
            .unwrap_or_else(Vector3::zeros);

        Ok(CameraModel {
            width,
            height,
            left_intrinsics: calib.left.intrinsics,
            right_intrinsics: calib.right.intrinsics,
            left_distortion: calib.left.distortion,
            right_distortion: calib.right.distortion,
            rot_left,
            rot_right,
            relative: calib.relative,
            essential_matrix: calib.essential_matrix,
            fundamental_matrix: calib.fundamental_matrix,
            rect,
            left_maps,
            right_maps,
        })
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Gauss-Newton refinement of the relative pose on the epipolar residual.
///
/// Minimises the Sampson distance of all corner correspondences over the six
/// pose parameters (Rodrigues rotation plus translation). The intrinsics stay
/// fixed and the translation is re-normalised to the averaged baseline after
/// every step, since the epipolar constraint carries no scale. Falls back to
/// the averaged pose whenever a step fails to improve the cost.
fn refine_relative_pose(
    initial: &Pose,
    left_intrinsics: &Intrinsics,
    right_intrinsics: &Intrinsics,
    left_points: &[Vec<nalgebra::Point2<f64>>],
    right_points: &[Vec<nalgebra::Point2<f64>>],
) -> Pose {
    let baseline = initial.translation.norm();
    if baseline <= 1e-12 {
        return *initial;
    }

    let pairs: Vec<(nalgebra::Point2<f64>, nalgebra::Point2<f64>)> = left_points
        .iter()
        .zip(right_points.iter())
        .flat_map(|(l, r)| l.iter().copied().zip(r.iter().copied()))
        .collect();
    if pairs.len() < 8 {
        return *initial;
    }

    let pose_cost = |params: &[f64; 6]| -> f64 {
        let pose = pose_from_params(params, baseline);
        let f = fundamental_from_essential(
            &essential_from_pose(&pose),
            left_intrinsics,
            right_intrinsics,
        );
        pairs.iter().map(|(l, r)| sampson_residual(&f, l, r).powi(2)).sum()
    };

    let mut params = params_from_pose(initial);
    let mut cost = pose_cost(&params);

    for _ in 0..STEREO_MAX_ITERS {
        let pose = pose_from_params(&params, baseline);
        let f = fundamental_from_essential(
            &essential_from_pose(&pose),
            left_intrinsics,
            right_intrinsics,
        );

        let n = pairs.len();
        let mut jac = DMatrix::<f64>::zeros(n, 6);
        let mut res = DMatrix::<f64>::zeros(n, 1);
        for (i, (l, r)) in pairs.iter().enumerate() {
            res[(i, 0)] = sampson_residual(&f, l, r);
        }

        let eps = 1e-7;
        for k in 0..6 {
            let mut perturbed = params;
            perturbed[k] += eps;
            let pp = pose_from_params(&perturbed, baseline);
            let fp = fundamental_from_essential(
                &essential_from_pose(&pp),
                left_intrinsics,
                right_intrinsics,
            );
            for (i, (l, r)) in pairs.iter().enumerate() {
                jac[(i, k)] = (sampson_residual(&fp, l, r) - res[(i, 0)]) / eps;
            }
        }

        let jt = jac.transpose();
        let h = &jt * &jac;
        let g = &jt * &res;
        let delta = match h.lu().solve(&g) {
            Some(d) => d,
            None => break,
        };

        let mut next = params;
        for k in 0..6 {
            next[k] -= delta[(k, 0)];
        }
        let next_cost = pose_cost(&next);
        if !next_cost.is_finite() || next_cost > cost {
            break;
        }

        let improvement = cost - next_cost;
        params = next;
        cost = next_cost;
        if improvement <= STEREO_EPS {
            break;
        }
    }

    pose_from_params(&params, baseline)
}

fn params_from_pose(pose: &Pose) -> [f64; 6] {
    let w = rotation_to_rodrigues(&pose.rotation);
    let t = pose.translation;
    [w[0], w[1], w[2], t[0], t[1], t[2]]
}

fn pose_from_params(params: &[f64; 6], baseline: f64) -> Pose {
    let rotation = *Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2]))
        .matrix();
    let mut translation = Vector3::new(params[3], params[4], params[5]);
    let norm = translation.norm();
    if norm > 1e-12 {
        translation *= baseline / norm;
    }
    Pose {
        rotation,
        translation,
    }
}

/// Signed Sampson residual of one correspondence against a fundamental matrix.
fn sampson_residual(
    f: &Matrix3<f64>,
    left: &nalgebra::Point2<f64>,
    right: &nalgebra::Point2<f64>,
) -> f64 {
    let x1 = Vector3::new(left.x, left.y, 1.0);
    let x2 = Vector3::new(right.x, right.y, 1.0);
    let fx1 = f * x1;
    let ftx2 = f.transpose() * x2;
    let num = x2.dot(&fx1);
    let denom =
        (fx1[0] * fx1[0] + fx1[1] * fx1[1] + ftx2[0] * ftx2[0] + ftx2[1] * ftx2[1]).sqrt();
    if denom <= 1e-18 {
        0.0
    } else {
        num / denom
    }
}

/// E = [t]x * R.
fn essential_from_pose(pose: &Pose) -> Matrix3<f64> {
    let t = pose.translation;
    let skew = Matrix3::new(
        0.0, -t[2], t[1], //
        t[2], 0.0, -t[0], //
        -t[1], t[0], 0.0,
    );
    skew * pose.rotation
}

/// F = K2^-T * E * K1^-1.
fn fundamental_from_essential(
    essential: &Matrix3<f64>,
    left: &Intrinsics,
    right: &Intrinsics,
) -> Matrix3<f64> {
    right.inverse_matrix().transpose() * essential * left.inverse_matrix()
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::{generate_object_points, project_points};
    use nalgebra::{Point2, Point3, Rotation3};

    fn pinhole(fx: f64) -> Intrinsics {
        Intrinsics {
            fx,
            fy: fx,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        }
    }

    fn render_rig(
        k: &Intrinsics,
        baseline: f64,
        board: &[Point3<f64>],
        left_poses: &[Pose],
    ) -> (
        Vec<Vec<Point3<f64>>>,
        Vec<Vec<Point2<f64>>>,
        Vec<Vec<Point2<f64>>>,
    ) {
        // Pure lateral rig: right camera shifted along +x of the left frame.
        let dist = Distortion::default();
        let mut objs = Vec::new();
        let mut lefts = Vec::new();
        let mut rights = Vec::new();
        for lp in left_poses {
            let rp = Pose {
                rotation: lp.rotation,
                translation: lp.translation - Vector3::new(baseline, 0.0, 0.0),
            };
            objs.push(board.to_vec());
            lefts.push(project_points(board, k, &dist, lp));
            rights.push(project_points(board, k, &dist, &rp));
        }
        (objs, lefts, rights)
    }

    fn left_poses() -> Vec<Pose> {
        [
            (0.2, 0.1, -4.0, -2.5, 14.0),
            (-0.25, 0.15, -3.5, -3.0, 15.0),
            (0.1, -0.3, -4.5, -2.0, 13.0),
            (-0.15, -0.2, -4.0, -2.8, 16.0),
            (0.3, 0.25, -3.8, -2.2, 15.5),
        ]
        .iter()
        .map(|&(rx, ry, tx, ty, tz)| Pose {
            rotation: *Rotation3::from_euler_angles(rx, ry, 0.0).matrix(),
            translation: Vector3::new(tx, ty, tz),
        })
        .collect()
    }

    #[test]
    fn recovers_lateral_baseline() {
        let k = pinhole(800.0);
        let board = generate_object_points((6, 9));
        let baseline = 2.0;
        let (objs, lefts, rights) = render_rig(&k, baseline, &board, &left_poses());

        let calib = stereo_calibrate(&objs, &lefts, &rights, (640, 480)).unwrap();

        // Rotation close to identity, translation dominated by the x component.
        let r = calib.relative.rotation;
        assert!((r - Matrix3::identity()).norm() < 0.05);
        let t = calib.relative.translation;
        assert!((t.norm() - baseline).abs() / baseline < 0.1);
        assert!(t[0].abs() > t[1].abs().max(t[2].abs()));
    }

    #[test]
    fn rectify_of_aligned_rig_is_near_identity() {
        let k = pinhole(700.0);
        let relative = Pose {
            rotation: Matrix3::identity(),
            translation: Vector3::new(-2.5, 0.0, 0.0),
        };
        let rect = stereo_rectify(&k, &k, &relative).unwrap();

        assert!((rect.r1 - Matrix3::identity()).norm() < 1e-9);
        assert!((rect.r2 - Matrix3::identity()).norm() < 1e-9);
        assert!((rect.p1[(0, 0)] - 700.0).abs() < 1e-9);
        // tx column encodes -fx * baseline.
        assert!((rect.p2[(0, 3)] + 700.0 * 2.5).abs() < 1e-6);
        assert!((rect.q[(2, 3)] - 700.0).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_is_rejected() {
        let k = pinhole(700.0);
        let relative = Pose {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        };
        assert!(stereo_rectify(&k, &k, &relative).is_err());
    }

    #[test]
    fn identity_maps_for_undistorted_aligned_camera() {
        let k = pinhole(500.0);
        let p = Matrix3x4::new(
            500.0, 0.0, 320.0, 0.0, //
            0.0, 500.0, 240.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        );
        let maps = init_undistort_rectify_map(
            (8, 6),
            &k,
            &Distortion::default(),
            &Matrix3::identity(),
            &p,
        )
        .unwrap();

        for y in 0..6u32 {
            for x in 0..8u32 {
                let i = (y * 8 + x) as usize;
                assert!((maps.map_x[i] - x as f32).abs() < 1e-4);
                assert!((maps.map_y[i] - y as f32).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn rodrigues_roundtrip_small_angle() {
        let r = Rotation3::from_euler_angles(0.1, -0.2, 0.05);
        let v = rotation_to_rodrigues(r.matrix());
        let back = Rotation3::from_scaled_axis(v);
        assert!((back.matrix() - r.matrix()).norm() < 1e-9);
    }
}
