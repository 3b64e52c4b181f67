//! # Local Filesystem Backend
//!
//! Delegates every operation directly to OS filesystem calls. Object hash
//! enumeration returns the empty set unconditionally — a per-object
//! `exists()` check is cheap enough on a local filesystem that there is no
//! benefit to a bulk listing, unlike the remote backend where each
//! round-trip has real latency.

use super::{Backend, StoreMode};
use crate::error::{HbError, Result};
use crate::hashing;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct LocalBackend {
    root: String,
}

impl LocalBackend {
    pub fn new(root: &str) -> Self {
        LocalBackend {
            root: root.to_string(),
        }
    }
}

impl Backend for LocalBackend {
    fn root(&self) -> &str {
        &self.root
    }

    fn try_mkdir(&self, path: &str) -> bool {
        fs::create_dir(path).is_ok()
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn isdir(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(path)?))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + '_>> {
        Ok(Box::new(File::create(path)?))
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        fs::rename(src, dst)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn add_object(&self, hash: &str, source_path: &Path, mode: StoreMode) -> Result<bool> {
        let obj_path_str = crate::layout::object_path(&self.root, hash);
        let obj_path = Path::new(&obj_path_str);
        if obj_path.exists() {
            return Ok(false);
        }
        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match mode {
            StoreMode::Symlink => {
                #[cfg(unix)]
                std::os::unix::fs::symlink(source_path, obj_path)?;
                #[cfg(not(unix))]
                return Err(HbError::Other(anyhow::anyhow!(
                    "symlink object storage is only supported on unix"
                )));
            }
            StoreMode::Hardlink => {
                fs::hard_link(source_path, obj_path)?;
            }
            StoreMode::Copy => {
                let tmp_path_str = self.temp_path();
                let tmp_path = Path::new(&tmp_path_str);
                let computed_hash = {
                    let mut src = File::open(source_path)?;
                    let mut dst = File::create(tmp_path)?;
                    hashing::copy_and_hash(&mut src, &mut dst)?
                };
                if computed_hash != hash {
                    let _ = fs::remove_file(tmp_path);
                    return Err(HbError::HashMismatch {
                        path: source_path.to_path_buf(),
                        expected: hash.to_string(),
                        actual: computed_hash,
                    });
                }
                fs::rename(tmp_path, obj_path)?;
            }
        }

        Ok(true)
    }

    fn enumerate_object_hashes(&self) -> HashSet<String> {
        HashSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;

    fn init_minimal_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for d in ["objects", "manifests", "tmp"] {
            fs::create_dir(dir.path().join(d)).unwrap();
        }
        for bucket in layout::buckets() {
            fs::create_dir(dir.path().join("objects").join(bucket)).unwrap();
        }
        dir
    }

    #[test]
    fn add_object_stores_and_dedups() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("a.txt");
        fs::write(&src_path, b"abcd").unwrap();
        let hash = hashing::hash_file(&src_path).unwrap();

        let first = backend.add_object(&hash, &src_path, StoreMode::Copy).unwrap();
        assert!(first);
        let second = backend.add_object(&hash, &src_path, StoreMode::Copy).unwrap();
        assert!(!second);

        let obj_path = layout::object_path(&backend.root, &hash);
        assert_eq!(fs::read(obj_path).unwrap(), b"abcd");
    }

    #[test]
    fn add_object_rejects_hash_mismatch() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("a.txt");
        fs::write(&src_path, b"abcd").unwrap();

        let wrong_hash = "0".repeat(32);
        let result = backend.add_object(&wrong_hash, &src_path, StoreMode::Copy);
        assert!(matches!(result, Err(HbError::HashMismatch { .. })));

        let obj_path = layout::object_path(&backend.root, &wrong_hash);
        assert!(!Path::new(&obj_path).exists());
    }

    #[test]
    fn check_valid_rejects_missing_config() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());
        let err = backend.check_valid().unwrap_err();
        assert!(matches!(err, HbError::UnsupportedLegacyRepository(_)));
    }

    #[test]
    fn check_valid_accepts_v1_config() {
        let repo = init_minimal_repo();
        fs::write(
            repo.path().join("hashedbackup.json"),
            r#"{"version":1}"#,
        )
        .unwrap();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());
        backend.check_valid().unwrap();
    }

    #[test]
    fn check_valid_rejects_completely_absent_repo() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("nope").to_str().unwrap());
        let err = backend.check_valid().unwrap_err();
        assert!(matches!(err, HbError::NotInitialized(_)));
    }
}
