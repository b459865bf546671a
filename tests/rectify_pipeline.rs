//! # Calibration and rectification pipeline test
//!
//! Renders a synthetic stereo rig photographing a tilted checkerboard from
//! several poses, runs the calibration and rectification flows over the
//! resulting capture directory and checks the persisted products.

use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};
use nalgebra::{Matrix3, Rotation3, Vector3};
use tempfile::tempdir;

use cv_stereo_pipeline::prelude::*;

const WIDTH: u32 = 480;
const HEIGHT: u32 = 360;
const FOCAL: f64 = 380.0;
const ROWS: usize = 4;
const COLS: usize = 6;
const BOARD_DISTANCE: f64 = 12.0;
const BASELINE: f64 = 0.8;

/// Pose placing the board centre on the optical axis at the working distance,
/// tilted by the given Euler angles.
fn board_pose(rx: f64, ry: f64) -> (Matrix3<f64>, Vector3<f64>) {
    let r = *Rotation3::from_euler_angles(rx, ry, 0.0).matrix();
    let centre = Vector3::new(
        (ROWS.max(COLS) as f64 - 1.0) / 2.0,
        (ROWS.min(COLS) as f64 - 1.0) / 2.0,
        0.0,
    );
    let t = Vector3::new(0.0, 0.0, BOARD_DISTANCE) - r * centre;
    (r, t)
}

/// Shade of the board plane at board coordinates (x, y).
///
/// Interior junctions carry full contrast while the outer squares fade into the
/// grey background, so the only strong corner responses are the interior ones.
fn board_shade(x: f64, y: f64) -> f64 {
    let major = ROWS.max(COLS) as f64;
    let minor = ROWS.min(COLS) as f64;
    let dist = (x + 1.0).min(major - x).min(y + 1.0).min(minor - y);
    let fade = (dist / 0.5).clamp(0.0, 1.0);
    let dark = (((x + 1.0).floor() as i64) + ((y + 1.0).floor() as i64)).rem_euclid(2) == 0;
    if dark {
        128.0 - 100.0 * fade
    } else {
        128.0 + 100.0 * fade
    }
}

/// Render the board as seen by a pinhole camera displaced `shift` along +x of
/// the left camera frame. Pixels are supersampled 2x2 to soften square edges.
fn render_view(rotation: &Matrix3<f64>, translation: &Vector3<f64>, shift: f64) -> GrayImage {
    let k_inv = Matrix3::new(
        1.0 / FOCAL,
        0.0,
        -(WIDTH as f64 / 2.0) / FOCAL,
        0.0,
        1.0 / FOCAL,
        -(HEIGHT as f64 / 2.0) / FOCAL,
        0.0,
        0.0,
        1.0,
    );
    let rt = rotation.transpose();
    let t = translation - Vector3::new(shift, 0.0, 0.0);
    let rt_t = rt * t;

    GrayImage::from_fn(WIDTH, HEIGHT, |u, v| {
        let mut acc = 0.0f64;
        for (du, dv) in [(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75)] {
            let ray = rt * (k_inv * Vector3::new(u as f64 + du, v as f64 + dv, 1.0));
            if ray[2].abs() < 1e-9 {
                acc += 128.0;
                continue;
            }
            let s = rt_t[2] / ray[2];
            if s <= 0.0 {
                acc += 128.0;
                continue;
            }
            let q = s * ray - rt_t;
            acc += board_shade(q[0], q[1]);
        }
        Luma([(acc / 4.0).round() as u8])
    })
}

/// Write four detectable board pairs plus one featureless pair the calibration
/// has to skip, laid out the way the capture tool would produce them.
fn write_calibration_fixture(dir: &Path) {
    let views = [(0.15, 0.1), (-0.18, 0.12), (0.12, -0.2), (-0.1, -0.15)];

    fs::create_dir_all(dir.join("LEFT")).unwrap();
    fs::create_dir_all(dir.join("RIGHT")).unwrap();
    for (i, &(rx, ry)) in views.iter().enumerate() {
        let (r, t) = board_pose(rx, ry);
        render_view(&r, &t, 0.0)
            .save(dir.join(format!("LEFT/L_9_{i}.jpg")))
            .unwrap();
        render_view(&r, &t, BASELINE)
            .save(dir.join(format!("RIGHT/R_9_{i}.jpg")))
            .unwrap();
    }

    let flat = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([128]));
    flat.save(dir.join("LEFT/L_9_4.jpg")).unwrap();
    flat.save(dir.join("RIGHT/R_9_4.jpg")).unwrap();

    fs::write(dir.join("LEFT/L_9_0.lbl"), "name: board\nf: 30.0\n").unwrap();
}

#[test]
fn calibration_skips_undetectable_pairs() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("checker_9_images");
    write_calibration_fixture(&input);

    let grid = GridConfig {
        rows: ROWS,
        cols: COLS,
    };
    let calib = calibrate_directory(&input, &grid).unwrap();

    // The featureless pair is skipped, so exactly the four board views survive.
    assert_eq!(calib.left.extrinsics.len(), 4);
    assert_eq!(calib.right.extrinsics.len(), 4);
    assert!(calib.left.rms_reprojection_error.is_finite());
    assert!(calib.right.rms_reprojection_error.is_finite());

    // The rig is a pure lateral one; the recovered baseline should reflect it.
    let t = calib.relative.translation;
    assert!(t[0].abs() > t[1].abs().max(t[2].abs()));
    assert!((t.norm() - BASELINE).abs() / BASELINE < 0.25);
}

#[test]
fn rectify_flow_writes_first_pair_and_label() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("checker_9_images");
    write_calibration_fixture(&input);
    let output = tempdir().unwrap();

    let grid = GridConfig {
        rows: ROWS,
        cols: COLS,
    };
    rectify_directory(&input, output.path(), &grid).unwrap();

    // Rectified outputs keep the source dimensions and the session naming.
    let left = image::open(output.path().join("LEFT/L_9_0.jpg"))
        .unwrap()
        .to_luma8();
    let right = image::open(output.path().join("RIGHT/R_9_0.jpg"))
        .unwrap()
        .to_luma8();
    assert_eq!(left.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(right.dimensions(), (WIDTH, HEIGHT));

    // The first left image's label rides along verbatim.
    let label = fs::read_to_string(output.path().join("LEFT/L_9_0.lbl")).unwrap();
    assert_eq!(label, "name: board\nf: 30.0\n");
}
