//! # Stereo calibration tool
//!
//! Calibrates a stereo rig from a directory of checkerboard captures laid out as
//! `<dir>/LEFT` and `<dir>/RIGHT`. The checkerboard dimensions come from the
//! `HEIGHT_NUM` and `WIDTH_NUM` environment variables. Prints a JSON calibration
//! report to stdout, or writes it to a file with `--report`.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use cv_stereo_pipeline::calibrate::CameraCalibration;
use cv_stereo_pipeline::prelude::*;
use cv_stereo_pipeline::stereo::rotation_to_rodrigues;

#[derive(Debug, Parser)]
#[command(author, version, about = "Stereo camera calibration from checkerboard captures")]
struct Args {
    /// Directory containing LEFT/ and RIGHT/ calibration images.
    calibration_dir: PathBuf,

    /// Write the JSON calibration report to this file instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CameraReport {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    distortion: [f64; 5],
    rms_reprojection_error: f64,
}

#[derive(Debug, Serialize)]
struct CalibrationReport {
    image_width: u32,
    image_height: u32,
    left: CameraReport,
    right: CameraReport,
    relative_rotation_rodrigues: [f64; 3],
    relative_translation: [f64; 3],
    baseline: f64,
}

impl CameraReport {
    fn from_calibration(calib: &CameraCalibration) -> Self {
        let k = &calib.intrinsics;
        let d = &calib.distortion;
        CameraReport {
            fx: k.fx,
            fy: k.fy,
            cx: k.cx,
            cy: k.cy,
            distortion: [d.k1, d.k2, d.p1, d.p2, d.k3],
            rms_reprojection_error: calib.rms_reprojection_error,
        }
    }
}

impl CalibrationReport {
    fn from_calibration(calib: &StereoCalibration) -> Self {
        let rot = rotation_to_rodrigues(&calib.relative.rotation);
        let t = calib.relative.translation;
        CalibrationReport {
            image_width: calib.left.intrinsics.width,
            image_height: calib.left.intrinsics.height,
            left: CameraReport::from_calibration(&calib.left),
            right: CameraReport::from_calibration(&calib.right),
            relative_rotation_rodrigues: [rot[0], rot[1], rot[2]],
            relative_translation: [t[0], t[1], t[2]],
            baseline: t.norm(),
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let grid = GridConfig::from_env()?;

    let calib = calibrate_directory(&args.calibration_dir, &grid)?;
    let report = CalibrationReport::from_calibration(&calib);
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Config(format!("cannot serialise report: {e}")))?;

    match args.report {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}
