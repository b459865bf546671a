//! # Label sidecars
//!
//! Per-image `.lbl` text files written alongside capture, carrying `key:value` lines.
//! Only the `f` (focal length) key is consumed; the whole file is copied verbatim into
//! the rectifier output so the disparity mapper can find it later.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Path of the label sidecar belonging to an image, i.e. the image path with a `.lbl`
/// extension.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("lbl")
}

/// Read the focal length from a label file, if the file and an `f:` line exist.
///
/// The value is taken as the integer part before any decimal point, matching how the
/// labels are authored (`f:28.0`).
pub fn read_focal_length(label_path: &Path) -> Result<Option<i64>> {
    if !label_path.is_file() {
        return Ok(None);
    }

    let contents = fs::read_to_string(label_path)?;
    for line in contents.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        if key != "f" {
            continue;
        }

        let value = parts.next().unwrap_or("").trim();
        let integer_part = value.split('.').next().unwrap_or("");
        if let Ok(f) = integer_part.parse::<i64>() {
            return Ok(Some(f));
        }
    }

    Ok(None)
}

/// Copy the label file belonging to `image_path` to `dest`.
///
/// A missing label is fatal: the rectifier output is unusable for depth mapping
/// without the focal length it carries.
pub fn copy_sidecar(image_path: &Path, dest: &Path) -> Result<()> {
    let src = sidecar_path(image_path);
    if !src.is_file() {
        return Err(Error::MissingLabel(src));
    }
    fs::copy(&src, dest)?;
    Ok(())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_focal_length_integer_part() {
        let dir = tempfile::tempdir().unwrap();
        let lbl = dir.path().join("L_01_0.lbl");
        fs::write(&lbl, "session:01\nf:28.5\nexposure:4\n").unwrap();
        assert_eq!(read_focal_length(&lbl).unwrap(), Some(28));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            read_focal_length(&dir.path().join("absent.lbl")).unwrap(),
            None
        );
    }

    #[test]
    fn missing_f_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let lbl = dir.path().join("L_01_0.lbl");
        fs::write(&lbl, "session:01\n").unwrap();
        assert_eq!(read_focal_length(&lbl).unwrap(), None);
    }

    #[test]
    fn copy_requires_existing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("L_01_0.jpg");
        let out = dir.path().join("copy.lbl");
        assert!(matches!(
            copy_sidecar(&img, &out),
            Err(Error::MissingLabel(_))
        ));

        fs::write(sidecar_path(&img), "f:30\n").unwrap();
        copy_sidecar(&img, &out).unwrap();
        assert_eq!(read_focal_length(&out).unwrap(), Some(30));
    }
}
