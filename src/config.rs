//! # Environment configuration
//!
//! Typed configuration structures read once at program entry and threaded through the
//! pipeline constructors, replacing ad hoc environment lookups scattered through the code.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Focal length assumed when neither a label sidecar nor `FOCAL_LENGTH` provides one.
pub const DEFAULT_FOCAL_LENGTH: i64 = 28;

/// Baseline length assumed when `BASE_LENGTH` is not set.
pub const DEFAULT_BASE_LENGTH: i64 = 250;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Interior corner counts of the calibration checkerboard.
///
/// Read from the required `HEIGHT_NUM` and `WIDTH_NUM` environment variables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of interior corners along the board height.
    pub rows: usize,
    /// Number of interior corners along the board width.
    pub cols: usize,
}

/// Focal and baseline lengths used for disparity to depth conversion.
///
/// `FOCAL_LENGTH` and `BASE_LENGTH` are optional overrides; a label sidecar next to the
/// chosen image takes precedence over `FOCAL_LENGTH`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DepthConfig {
    pub focal_length: Option<i64>,
    pub base_length: i64,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl GridConfig {
    /// Read the checkerboard dimensions from the environment.
    ///
    /// Both variables are required; absence or an unparsable value is a fatal
    /// configuration error.
    pub fn from_env() -> Result<Self> {
        let rows = required_var("HEIGHT_NUM")?;
        let cols = required_var("WIDTH_NUM")?;

        if rows < 2 || cols < 2 {
            return Err(Error::Config(format!(
                "checkerboard grid must be at least 2x2, got {rows}x{cols}"
            )));
        }

        Ok(GridConfig { rows, cols })
    }

    /// Pattern size as (rows, cols).
    pub fn pattern_size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of interior corners.
    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }
}

impl DepthConfig {
    /// Read the optional focal/baseline overrides from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(DepthConfig {
            focal_length: optional_var("FOCAL_LENGTH")?,
            base_length: optional_var("BASE_LENGTH")?.unwrap_or(DEFAULT_BASE_LENGTH),
        })
    }

    /// Focal length to fall back to when no label sidecar carries one.
    pub fn fallback_focal_length(&self) -> i64 {
        self.focal_length.unwrap_or(DEFAULT_FOCAL_LENGTH)
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn required_var<T: std::str::FromStr>(name: &str) -> Result<T> {
    let raw = std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))?;
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("could not parse {name}={raw:?}")))
}

fn optional_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("could not parse {name}={raw:?}"))),
        Err(_) => Ok(None),
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_config_requires_both_dimensions() {
        std::env::remove_var("HEIGHT_NUM");
        std::env::remove_var("WIDTH_NUM");
        assert!(GridConfig::from_env().is_err());
    }

    #[test]
    fn depth_config_defaults() {
        std::env::remove_var("FOCAL_LENGTH");
        std::env::remove_var("BASE_LENGTH");
        let cfg = DepthConfig::from_env().unwrap();
        assert_eq!(cfg.fallback_focal_length(), DEFAULT_FOCAL_LENGTH);
        assert_eq!(cfg.base_length, DEFAULT_BASE_LENGTH);
    }
}
