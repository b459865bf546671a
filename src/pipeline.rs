//! # Pipeline entry points
//!
//! The three batch flows wired together from the lower modules: calibrate a
//! capture directory, rectify its first pair, and compute disparity/depth
//! products for one selected rectified pair. Each flow is a single-threaded,
//! synchronous run over the filesystem.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use image::GrayImage;
use log::{info, warn};

use crate::block_matching::{self, BlockMatcher};
use crate::calibrate::{generate_object_points, Correspondences};
use crate::chessboard::find_chessboard_corners;
use crate::config::{DepthConfig, GridConfig};
use crate::depth::{depth_from_disparity, ZeroDisparity};
use crate::disparity::DisparityAlgorithm;
use crate::error::*;
use crate::label;
use crate::output;
use crate::pairs::StereoImageSet;
use crate::rectify::rectify_pair;
use crate::sgm::{self, SemiGlobalMatcher};
use crate::stereo::{stereo_calibrate, CameraModel, StereoCalibration};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Which disparity matcher to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    BlockMatching,
    SemiGlobalMatching,
}

/// Everything the disparity flow produced, returned for optional display.
#[derive(Debug)]
pub struct DisparityProducts {
    pub directory: PathBuf,
    pub image: GrayImage,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Algorithm {
    /// Numeric selector used on the command line: 1 = block matching,
    /// 2 = semi-global matching.
    pub fn from_selector(selector: u32) -> Result<Self> {
        match selector {
            1 => Ok(Algorithm::BlockMatching),
            2 => Ok(Algorithm::SemiGlobalMatching),
            other => Err(Error::Config(format!(
                "unknown algorithm selector {}, expected 1 or 2",
                other
            ))),
        }
    }

    /// Matcher instance with the preset parameters.
    pub fn matcher(&self) -> Result<Box<dyn DisparityAlgorithm>> {
        match self {
            Algorithm::BlockMatching => Ok(Box::new(BlockMatcher::new(
                block_matching::Params::default(),
            )?)),
            Algorithm::SemiGlobalMatching => Ok(Box::new(SemiGlobalMatcher::new(
                sgm::Params::default(),
            )?)),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Calibrate the stereo rig from a directory of checkerboard captures.
///
/// Pairs on which detection fails on either side are logged and skipped; the
/// run only fails if fewer than three pairs survive.
pub fn calibrate_directory(dir: &Path, grid: &GridConfig) -> Result<StereoCalibration> {
    let set = StereoImageSet::discover(dir)?;
    let pattern = grid.pattern_size();
    let board = generate_object_points(pattern);

    let mut corr = Correspondences::default();
    let mut image_size = None;

    for i in 0..set.len() {
        let (left_path, right_path) = set.pair(i)?;
        info!("image {}/{}", i + 1, set.len());

        let left = image::open(left_path)?.to_luma8();
        let right = image::open(right_path)?.to_luma8();

        let dims = left.dimensions();
        match image_size {
            None => image_size = Some(dims),
            Some(expected) if dims != expected || right.dimensions() != expected => {
                warn!(
                    "skipping pair {}: dimensions differ from the first pair",
                    i + 1
                );
                continue;
            }
            _ => {}
        }

        let corners_left = find_chessboard_corners(&left, pattern);
        let corners_right = find_chessboard_corners(&right, pattern);
        match (corners_left, corners_right) {
            (Ok(l), Ok(r)) => {
                info!("corners found in both images of pair {}", i + 1);
                corr.push_pair(&board, l, r);
            }
            (l, r) => {
                warn!(
                    "skipping pair {}: corner detection failed (left ok: {}, right ok: {})",
                    i + 1,
                    l.is_ok(),
                    r.is_ok()
                );
            }
        }
    }

    let image_size = image_size
        .ok_or_else(|| Error::Calibration("no readable calibration pairs".into()))?;
    if corr.len() < 3 {
        return Err(Error::Calibration(format!(
            "need at least 3 pairs with detected corners, found {}",
            corr.len()
        )));
    }

    info!("calibrating from {} matched pairs", corr.len());
    stereo_calibrate(&corr.object, &corr.left, &corr.right, image_size)
}

/// Calibrate a capture directory and rectify its first stereo pair.
///
/// Writes `L_<session>_0.jpg` / `R_<session>_0.jpg` under the output directory
/// along with a copy of the first left image's label sidecar.
pub fn rectify_directory(input: &Path, output: &Path, grid: &GridConfig) -> Result<()> {
    let session = output::session_from_dir(input)?;

    info!("creating stereo camera model");
    let calib = calibrate_directory(input, grid)?;
    let model = CameraModel::from_calibration(&calib)?;
    info!("calibration performed");

    let set = StereoImageSet::discover(input)?;
    let (left_path, right_path) = set.pair(0)?;
    let left = image::open(left_path)?.to_luma8();
    let right = image::open(right_path)?.to_luma8();

    let (left_rect, right_rect) = rectify_pair(&model, &left, &right)?;
    output::write_rectified_pair(output, &session, 0, &left_rect, &right_rect)?;
    label::copy_sidecar(left_path, &output::rectified_label_path(output, &session, 0))?;

    Ok(())
}

/// Numbered menu lines for the rectified pairs of a directory.
pub fn list_pairs(input: &Path) -> Result<Vec<String>> {
    let set = StereoImageSet::discover(input)?;
    Ok(set
        .menu_names()
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{}: {}", i + 1, name))
        .collect())
}

/// Compute and persist disparity and depth products for one rectified pair.
///
/// `pair` is the 1-based index shown by [`list_pairs`]. The focal length comes
/// from the left image's label sidecar when present, otherwise from the depth
/// configuration.
pub fn disparity_pair(
    input: &Path,
    output: &Path,
    algorithm: Algorithm,
    pair: usize,
    depth_config: &DepthConfig,
    zero_policy: ZeroDisparity,
) -> Result<DisparityProducts> {
    let set = StereoImageSet::discover(input)?;
    if pair == 0 {
        return Err(Error::PairOutOfRange {
            selected: 0,
            available: set.len(),
        });
    }
    let (left_path, right_path) = set.pair(pair - 1)?;

    let left = image::open(left_path)?.to_luma8();
    let right = image::open(right_path)?.to_luma8();

    let mut matcher = algorithm.matcher()?;
    info!("computing disparity with {}", matcher.name());
    let disparity = matcher.compute(&left, &right)?;

    let focal = match label::read_focal_length(&label::sidecar_path(left_path))? {
        Some(f) => {
            info!("focal length {} from label sidecar", f);
            f
        }
        None => {
            let f = depth_config.fallback_focal_length();
            info!("no label sidecar focal length, using {}", f);
            f
        }
    };
    let depth = depth_from_disparity(
        &disparity,
        depth_config.base_length as f64,
        focal as f64,
        zero_policy,
    );

    let left_name = left_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Config(format!(
            "left image path {} has no usable file name",
            left_path.display()
        )))?;
    let dir = output::disparity_output_dir(output, left_name, matcher.name())?;
    output::write_disparity_products(&dir, left_name, matcher.name(), &disparity, &depth)?;

    Ok(DisparityProducts {
        directory: dir,
        image: disparity.to_luma_normalised(),
    })
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_maps_to_algorithms() {
        assert_eq!(Algorithm::from_selector(1).unwrap(), Algorithm::BlockMatching);
        assert_eq!(
            Algorithm::from_selector(2).unwrap(),
            Algorithm::SemiGlobalMatching
        );
        assert!(Algorithm::from_selector(3).is_err());
    }

    #[test]
    fn matchers_carry_their_tags() {
        assert_eq!(Algorithm::BlockMatching.matcher().unwrap().name(), "BM");
        assert_eq!(
            Algorithm::SemiGlobalMatching.matcher().unwrap().name(),
            "SGBM"
        );
    }
}
