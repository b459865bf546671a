//! # Stereo Pipeline
//!
//! This crate provides stereo camera calibration, image rectification and
//! disparity/depth map generation from checkerboard calibration photographs and
//! stereo photograph pairs.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod block_matching;
pub mod calibrate;
pub mod chessboard;
pub mod config;
pub mod depth;
mod disparity;
mod error;
pub mod label;
pub mod output;
pub mod pairs;
pub mod pipeline;
pub mod rectify;
pub mod sgm;
pub mod stereo;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::config::{DepthConfig, GridConfig};
    pub use crate::depth::ZeroDisparity;
    pub use crate::disparity::{DisparityAlgorithm, DisparityMap};
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{
        calibrate_directory, disparity_pair, list_pairs, rectify_directory, Algorithm,
    };
    pub use crate::stereo::{CameraModel, StereoCalibration};
}
