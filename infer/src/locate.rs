//! Data file lookup across candidate directories and their ancestors.

use std::path::{Path, PathBuf};

use crate::error::InferError;

/// How many parent levels above the starting directory are probed.
pub const MAX_DEPTH: usize = 10;

/// Locates `file` under one of `dirs`, relative to the current directory.
///
/// See [`locate_file_from`].
pub fn locate_file(file: &str, dirs: &[String]) -> Result<PathBuf, InferError> {
    locate_file_from(Path::new(""), file, dirs)
}

/// Locates `file` under one of `dirs`, relative to `base`.
///
/// Each directory is tried in order, first at `base` and then at up to
/// [`MAX_DEPTH`] ancestors of it (`../dir/file`, `../../dir/file`, ...). The
/// first existing file wins. The returned path keeps the `..` components.
pub fn locate_file_from(base: &Path, file: &str, dirs: &[String]) -> Result<PathBuf, InferError> {
    for dir in dirs {
        let mut relative = Path::new(dir).join(file);
        for _ in 0..=MAX_DEPTH {
            let candidate = base.join(&relative);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if relative.is_absolute() {
                break;
            }
            relative = Path::new("..").join(relative);
        }
    }

    Err(InferError::FileNotFound {
        file: file.to_string(),
        dirs: dirs.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TARGET: &str = "locate-target-5e1c.bin";

    fn dirs() -> Vec<String> {
        vec!["data/x/".to_string(), "data/y/".to_string()]
    }

    fn fixture() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("data/y")).unwrap();
        fs::write(root.path().join("data/y").join(TARGET), b"x").unwrap();
        root
    }

    fn nested(root: &Path, depth: usize) -> PathBuf {
        let mut p = root.to_path_buf();
        for i in 0..depth {
            p = p.join(format!("l{i}"));
        }
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn found_in_ancestor() {
        let root = fixture();
        let base = nested(root.path(), 2);
        let path = locate_file_from(&base, TARGET, &dirs()).unwrap();
        assert!(path.is_file());
        assert!(path.ends_with(Path::new("../../data/y").join(TARGET)));
    }

    #[test]
    fn found_at_depth_bound() {
        let root = fixture();
        let base = nested(root.path(), MAX_DEPTH);
        assert!(locate_file_from(&base, TARGET, &dirs()).is_ok());
    }

    #[test]
    fn not_found_beyond_depth_bound() {
        let root = fixture();
        let base = nested(root.path(), MAX_DEPTH + 1);
        let err = locate_file_from(&base, TARGET, &dirs()).unwrap_err();
        match err {
            InferError::FileNotFound { file, dirs } => {
                assert_eq!(file, TARGET);
                assert_eq!(dirs.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn first_directory_wins() {
        let root = fixture();
        fs::create_dir_all(root.path().join("data/x")).unwrap();
        fs::write(root.path().join("data/x").join(TARGET), b"x").unwrap();
        let path = locate_file_from(root.path(), TARGET, &dirs()).unwrap();
        assert!(path.starts_with(root.path().join("data/x")));
    }

    #[test]
    fn directories_are_not_files() {
        let root = fixture();
        fs::create_dir_all(root.path().join("data/x").join(TARGET)).unwrap();
        let path = locate_file_from(root.path(), TARGET, &dirs()).unwrap();
        assert!(path.starts_with(root.path().join("data/y")));
    }

    #[test]
    fn absolute_directory() {
        let root = fixture();
        let dir = root.path().join("data/y").to_string_lossy().into_owned();
        let path = locate_file_from(Path::new("/nonexistent"), TARGET, &[dir]).unwrap();
        assert!(path.is_file());
    }
}
