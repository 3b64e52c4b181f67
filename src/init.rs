//! # Repository Initializer
//!
//! Creates the on-disk layout for a brand-new repository. A destination is
//! only valid to initialize if it does not exist yet (its parent must) or
//! already exists as an empty directory — anything else is refused rather
//! than silently reused.

use crate::error::{HbError, Result};
use crate::layout;
use std::fs;
use std::path::Path;

const README: &str = "This is a hashedbackup repository.\n\
Do not modify the contents of this directory by hand.\n";

/// Lays out `objects/`, `manifests/`, `tmp/`, all 256 object buckets, a
/// README, and finally `hashedbackup.json` — written last because its
/// presence is what a backend's `check_valid()` treats as the marker of a
/// complete, usable repository.
pub fn init(destination: &str) -> Result<()> {
    let root = Path::new(destination);

    if root.exists() {
        if !root.is_dir() {
            return Err(HbError::InvalidConfig(format!(
                "{destination} exists and is not a directory"
            )));
        }
        if fs::read_dir(root)?.next().is_some() {
            return Err(HbError::InvalidConfig(format!(
                "{destination} is not an empty directory"
            )));
        }
    } else {
        match root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                return Err(HbError::InvalidConfig(format!(
                    "parent directory {} does not exist",
                    parent.display()
                )));
            }
            _ => fs::create_dir(root)?,
        }
    }

    fs::create_dir_all(layout::tmp_dir(destination))?;
    fs::create_dir_all(layout::manifests_root(destination))?;
    fs::create_dir(layout::objects_root(destination))?;
    for bucket in layout::buckets() {
        fs::create_dir(layout::bucket_dir(destination, &bucket))?;
    }

    fs::write(layout::readme_path(destination), README)?;
    fs::write(layout::config_path(destination), r#"{"version":1}"#)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_expected_layout() {
        let parent = tempfile::tempdir().unwrap();
        let dst = parent.path().join("repo");
        init(dst.to_str().unwrap()).unwrap();

        assert!(dst.join("objects").join("00").is_dir());
        assert!(dst.join("objects").join("ff").is_dir());
        assert!(dst.join("manifests").is_dir());
        assert!(dst.join("tmp").is_dir());
        assert!(dst.join("README.txt").is_file());
        let config = std::fs::read_to_string(dst.join("hashedbackup.json")).unwrap();
        assert_eq!(config, r#"{"version":1}"#);
    }

    #[test]
    fn init_accepts_preexisting_empty_directory() {
        let dst = tempfile::tempdir().unwrap();
        init(dst.path().to_str().unwrap()).unwrap();
        assert!(dst.path().join("hashedbackup.json").is_file());
    }

    #[test]
    fn init_rejects_nonempty_directory() {
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(dst.path().join("existing.txt"), b"hi").unwrap();
        let err = init(dst.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, HbError::InvalidConfig(_)));
    }

    #[test]
    fn init_rejects_missing_parent() {
        let parent = tempfile::tempdir().unwrap();
        let dst = parent.path().join("missing").join("repo");
        let err = init(dst.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, HbError::InvalidConfig(_)));
    }

    #[test]
    fn init_rejects_reinitializing_populated_repo() {
        let parent = tempfile::tempdir().unwrap();
        let dst = parent.path().join("repo");
        init(dst.to_str().unwrap()).unwrap();
        let err = init(dst.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, HbError::InvalidConfig(_)));
    }
}
