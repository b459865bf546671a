//! # Output products
//!
//! Directory layout, file naming and CSV serialisation for the rectification and
//! disparity stages. Rectified pairs land in `LEFT/` and `RIGHT/` folders named
//! `L_<session>_<index>.jpg` / `R_<session>_<index>.jpg`; disparity products land
//! in `<output>/<session>/<algorithm>/` with the left image's `L` marker swapped
//! for the algorithm tag.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::GrayImage;
use log::info;
use ndarray::Array2;

use crate::disparity::DisparityMap;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Session identifier from a capture directory name.
///
/// Capture directories are named like `checker_<session>_images`; the session is
/// the token after the first underscore.
pub fn session_from_dir(dir: &Path) -> Result<String> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let mut parts = name.split('_');
    parts.next();
    match parts.next() {
        Some(session) if !session.is_empty() => Ok(session.to_string()),
        _ => Err(Error::Config(format!(
            "cannot derive a session from directory name '{}', expected '<prefix>_<session>_...'",
            name
        ))),
    }
}

/// Session identifier from a rectified image name such as `L_5_0.jpg`: the stem
/// without the two-character marker prefix and the four-character extension.
pub fn session_from_image_name(name: &str) -> Result<&str> {
    if name.len() <= 6 || !name.is_char_boundary(2) || !name.is_char_boundary(name.len() - 4) {
        return Err(Error::Config(format!(
            "image name '{}' does not follow the '<marker>_<session>.<ext>' convention",
            name
        )));
    }
    Ok(&name[2..name.len() - 4])
}

/// Write a rectified pair under `<out>/LEFT/` and `<out>/RIGHT/`.
///
/// Returns the paths of the written left and right images.
pub fn write_rectified_pair(
    out_dir: &Path,
    session: &str,
    index: usize,
    left: &GrayImage,
    right: &GrayImage,
) -> Result<(PathBuf, PathBuf)> {
    let left_dir = out_dir.join("LEFT");
    let right_dir = out_dir.join("RIGHT");
    fs::create_dir_all(&left_dir)?;
    fs::create_dir_all(&right_dir)?;

    let left_path = left_dir.join(format!("L_{}_{}.jpg", session, index));
    let right_path = right_dir.join(format!("R_{}_{}.jpg", session, index));

    left.save(&left_path)
        .map_err(|_| Error::ImageWrite(left_path.clone()))?;
    right
        .save(&right_path)
        .map_err(|_| Error::ImageWrite(right_path.clone()))?;

    info!("rectified pair written to {}", out_dir.display());
    Ok((left_path, right_path))
}

/// Target path for the label sidecar accompanying a rectified left image.
pub fn rectified_label_path(out_dir: &Path, session: &str, index: usize) -> PathBuf {
    out_dir.join("LEFT").join(format!("L_{}_{}.lbl", session, index))
}

/// Nested output directory `<out>/<session>/<algorithm>/` for one disparity run.
pub fn disparity_output_dir(out_dir: &Path, left_name: &str, algorithm: &str) -> Result<PathBuf> {
    let session = session_from_image_name(left_name)?;
    let dir = out_dir.join(session).join(algorithm);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write the normalised disparity image plus the disparity and depth CSV grids.
///
/// File names are derived from the left image name: the `L` marker becomes the
/// algorithm tag for the image, and `disp<ALG>` / `dept<ALG>` for the grids.
pub fn write_disparity_products(
    dir: &Path,
    left_name: &str,
    algorithm: &str,
    disparity: &DisparityMap,
    depth: &Array2<f32>,
) -> Result<()> {
    let img_name = left_name.replacen('L', algorithm, 1);
    let img_path = dir.join(&img_name);
    disparity
        .to_luma_normalised()
        .save(&img_path)
        .map_err(|_| Error::ImageWrite(img_path.clone()))?;

    let disp_name = left_name
        .replacen('L', &format!("disp{}", algorithm), 1)
        .replace(".jpg", ".csv");
    write_csv(&dir.join(disp_name), disparity.as_array())?;

    let dept_name = left_name
        .replacen('L', &format!("dept{}", algorithm), 1)
        .replace(".jpg", ".csv");
    write_csv(&dir.join(dept_name), depth)?;

    info!("disparity products written to {}", dir.display());
    Ok(())
}

/// Comma-delimited plain text grid, six decimal places, no header.
pub fn write_csv(path: &Path, grid: &Array2<f32>) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for row in grid.outer_iter() {
        let mut first = true;
        for v in row.iter() {
            if !first {
                write!(out, ",")?;
            }
            write!(out, "{:.6}", v)?;
            first = false;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn session_comes_from_second_dir_token() {
        let s = session_from_dir(Path::new("/data/checker_7_images")).unwrap();
        assert_eq!(s, "7");
    }

    #[test]
    fn dir_without_session_token_is_an_error() {
        assert!(session_from_dir(Path::new("/data/checkerboard")).is_err());
    }

    #[test]
    fn session_strips_marker_and_extension() {
        assert_eq!(session_from_image_name("L_5_0.jpg").unwrap(), "5_0");
        assert!(session_from_image_name("L.jpg").is_err());
    }

    #[test]
    fn non_ascii_image_name_is_an_error_not_a_panic() {
        // The second byte sits inside a multi-byte character.
        assert!(session_from_image_name("Lé_0.jpg").is_err());
    }

    #[test]
    fn csv_grid_is_six_decimal_comma_delimited() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        let grid = Array2::from_shape_vec((2, 2), vec![1.0f32, 2.5, 0.0, -3.25]).unwrap();
        write_csv(&path, &grid).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1.000000,2.500000\n0.000000,-3.250000\n");
    }

    #[test]
    fn disparity_products_use_algorithm_tag_names() {
        let dir = tempdir().unwrap();
        let out = disparity_output_dir(dir.path(), "L_5_0.jpg", "BM").unwrap();
        assert!(out.ends_with("5_0/BM"));

        let mut map = DisparityMap::new(4, 4);
        map.put(1, 1, 12.0);
        let depth = Array2::zeros((4, 4));
        write_disparity_products(&out, "L_5_0.jpg", "BM", &map, &depth).unwrap();

        assert!(out.join("BM_5_0.jpg").exists());
        assert!(out.join("dispBM_5_0.csv").exists());
        assert!(out.join("deptBM_5_0.csv").exists());
    }
}
