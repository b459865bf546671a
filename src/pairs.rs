//! # Stereo image discovery
//!
//! Finds matched LEFT/RIGHT photograph sets under a capture directory. Pairing is by
//! sorted file name, with explicit validation instead of silent truncation: the two
//! folders must hold the same number of images, and where file names carry a side
//! marker prefix (`L_...` / `R_...`) the remainders must agree per index.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A matched set of LEFT/RIGHT images, in correspondence order.
#[derive(Debug, Clone)]
pub struct StereoImageSet {
    pub left: Vec<PathBuf>,
    pub right: Vec<PathBuf>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl StereoImageSet {
    /// Discover the image set under `dir`, which must contain `LEFT/` and `RIGHT/`
    /// subfolders of JPEG images (case-insensitive extension).
    pub fn discover(dir: &Path) -> Result<Self> {
        let left = list_jpegs(&dir.join("LEFT"))?;
        let right = list_jpegs(&dir.join("RIGHT"))?;

        if left.is_empty() && right.is_empty() {
            return Err(Error::NoImages(dir.to_path_buf()));
        }
        if left.len() != right.len() {
            return Err(Error::PairCountMismatch {
                left: left.len(),
                right: right.len(),
            });
        }

        let set = StereoImageSet { left, right };
        set.check_correspondence()?;
        debug!("discovered {} stereo pairs under {}", set.len(), dir.display());
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// The pair at `index`, or an out-of-range error.
    pub fn pair(&self, index: usize) -> Result<(&Path, &Path)> {
        if index >= self.len() {
            return Err(Error::PairOutOfRange {
                selected: index + 1,
                available: self.len(),
            });
        }
        Ok((&self.left[index], &self.right[index]))
    }

    /// Display names for the pair menu: RIGHT image names with the 2-character side
    /// prefix and the 4-character extension suffix stripped.
    pub fn menu_names(&self) -> Vec<String> {
        self.right
            .iter()
            .map(|p| {
                let name = file_name(p);
                if name.len() > 6
                    && name.is_char_boundary(2)
                    && name.is_char_boundary(name.len() - 4)
                {
                    name[2..name.len() - 4].to_string()
                } else {
                    name
                }
            })
            .collect()
    }

    /// Validate the positional pairing using the shared identifier embedded in the
    /// file names. Names that do not start with a single-letter marker and `_` are
    /// accepted as-is, keeping plain numbered captures working.
    fn check_correspondence(&self) -> Result<()> {
        for (i, (l, r)) in self.left.iter().zip(self.right.iter()).enumerate() {
            let ln = file_name(l);
            let rn = file_name(r);
            if let (Some(lk), Some(rk)) = (pair_key(&ln), pair_key(&rn)) {
                if lk != rk {
                    return Err(Error::PairNameMismatch {
                        index: i,
                        left: ln,
                        right: rn,
                    });
                }
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// List JPEG files in `dir`, sorted by file name.
///
/// Extensions match case-insensitively, covering captures saved as `.jpg` or `.JPG`.
fn list_jpegs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false);
        if path.is_file() && is_jpeg {
            out.push(path);
        }
    }
    out.sort_by(|a, b| file_name(a).cmp(&file_name(b)));
    Ok(out)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The shared pair identifier: the name with its side marker stripped, when the name
/// follows the `<marker>_<rest>` convention.
fn pair_key(name: &str) -> Option<&str> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(m), Some('_')) if m.is_ascii_alphabetic() => Some(&name[1..]),
        _ => None,
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    fn make_set(dir: &Path, names: &[(&str, &str)]) {
        fs::create_dir_all(dir.join("LEFT")).unwrap();
        fs::create_dir_all(dir.join("RIGHT")).unwrap();
        for (l, r) in names {
            touch(&dir.join("LEFT").join(l));
            touch(&dir.join("RIGHT").join(r));
        }
    }

    #[test]
    fn discovers_sorted_pairs() {
        let dir = tempfile::tempdir().unwrap();
        make_set(
            dir.path(),
            &[("L_01_1.jpg", "R_01_1.jpg"), ("L_01_0.JPG", "R_01_0.JPG")],
        );

        let set = StereoImageSet::discover(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        // Sorted by name, so pair 0 is the _0 capture despite insertion order.
        let (l, r) = set.pair(0).unwrap();
        assert!(l.ends_with("LEFT/L_01_0.JPG"));
        assert!(r.ends_with("RIGHT/R_01_0.JPG"));
    }

    #[test]
    fn rejects_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        make_set(dir.path(), &[("L_01_0.jpg", "R_01_0.jpg")]);
        touch(&dir.path().join("LEFT").join("L_01_1.jpg"));

        assert!(matches!(
            StereoImageSet::discover(dir.path()),
            Err(Error::PairCountMismatch { left: 2, right: 1 })
        ));
    }

    #[test]
    fn rejects_mispaired_names() {
        let dir = tempfile::tempdir().unwrap();
        make_set(
            dir.path(),
            &[("L_01_0.jpg", "R_01_0.jpg"), ("L_01_2.jpg", "R_01_1.jpg")],
        );

        assert!(matches!(
            StereoImageSet::discover(dir.path()),
            Err(Error::PairNameMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn empty_directories_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("LEFT")).unwrap();
        fs::create_dir_all(dir.path().join("RIGHT")).unwrap();
        assert!(matches!(
            StereoImageSet::discover(dir.path()),
            Err(Error::NoImages(_))
        ));
    }

    #[test]
    fn menu_names_strip_marker_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        make_set(dir.path(), &[("L_01_0.jpg", "R_01_0.jpg")]);
        let set = StereoImageSet::discover(dir.path()).unwrap();
        assert_eq!(set.menu_names(), vec!["01_0".to_string()]);
    }

    #[test]
    fn non_ascii_menu_name_falls_back_to_the_full_name() {
        let dir = tempfile::tempdir().unwrap();
        // The second byte of the right name sits inside a multi-byte character.
        make_set(dir.path(), &[("L_01_0.jpg", "Ré_1.jpg")]);
        let set = StereoImageSet::discover(dir.path()).unwrap();
        assert_eq!(set.menu_names(), vec!["Ré_1.jpg".to_string()]);
    }

    #[test]
    fn out_of_range_pair_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        make_set(dir.path(), &[("L_01_0.jpg", "R_01_0.jpg")]);
        let set = StereoImageSet::discover(dir.path()).unwrap();
        assert!(matches!(
            set.pair(3),
            Err(Error::PairOutOfRange {
                selected: 4,
                available: 1
            })
        ));
    }
}
