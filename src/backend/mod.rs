//! # Storage Backend
//!
//! A uniform capability set over the operations a repository needs, with
//! two implementations: [`local::LocalBackend`] for filesystem paths and
//! [`remote::RemoteBackend`] for `user@host:path` SFTP destinations. Every
//! call site in this crate holds a `&dyn Backend` and never downcasts to a
//! concrete type — the snapshot engine, the manifest writer and the
//! initializer are all backend-agnostic.

pub mod local;
pub mod remote;

use crate::error::{HbError, Result};
use crate::layout;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Object-storage mode for [`Backend::add_object`]. `Copy` streams and
/// hashes the source into a fresh object; `Symlink` and `Hardlink` are
/// test/experiment-only shortcuts documented as unsafe for real backups
/// (per spec §4.4) and are only honored by the local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    #[default]
    Copy,
    Symlink,
    Hardlink,
}

/// A live connection to a repository, abstracting over local filesystem and
/// remote SFTP access. All paths passed to trait methods are POSIX-style
/// strings rooted at [`Backend::root`] (see `layout` module).
pub trait Backend {
    /// The repository root this backend was opened against.
    fn root(&self) -> &str;

    /// Best-effort, idempotent directory creation. Returns whether this call
    /// actually created the directory (`false` if it already existed or the
    /// attempt otherwise failed).
    fn try_mkdir(&self, path: &str) -> bool;

    fn exists(&self, path: &str) -> bool;

    fn isdir(&self, path: &str) -> bool;

    fn listdir(&self, path: &str) -> Result<Vec<String>>;

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + '_>>;

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + '_>>;

    /// Must be atomic when `src` and `dst` share a filesystem/server.
    fn rename(&self, src: &str, dst: &str) -> Result<()>;

    fn delete(&self, path: &str) -> Result<()>;

    /// Stores the bytes at local path `source_path` under the content key
    /// `hash`. Returns `true` if a new object was written, `false` if the
    /// object already existed. See the backend implementations for the
    /// full contract (hash verification, size verification on remote).
    fn add_object(&self, hash: &str, source_path: &Path, mode: StoreMode) -> Result<bool>;

    /// Returns the set of object hashes already present in the repository,
    /// or an empty set if enumeration is infeasible — callers must then
    /// fall back to a per-object `exists` check.
    fn enumerate_object_hashes(&self) -> HashSet<String>;

    /// A fresh path under `tmp/` for a staging write.
    fn temp_path(&self) -> String {
        layout::temp_path(self.root())
    }

    /// Validates that `root()` is a v1 repository (`hashedbackup.json` with
    /// `version == 1`). Fails with `UnsupportedLegacyRepository` for a v0
    /// layout (a `manifests/` directory with no config record), or
    /// `NotInitialized` for anything else that doesn't look like a
    /// repository at all.
    fn check_valid(&self) -> Result<()> {
        let config = layout::config_path(self.root());
        if self.exists(&config) {
            let mut buf = Vec::new();
            self.open_read(&config)?.read_to_end(&mut buf)?;
            let value: serde_json::Value = serde_json::from_slice(&buf)
                .map_err(|e| HbError::Other(anyhow::anyhow!("corrupt repository config: {e}")))?;
            if value.get("version").and_then(|v| v.as_u64()) == Some(1) {
                return Ok(());
            }
            return Err(HbError::NotInitialized(PathBuf::from(self.root())));
        }
        if self.isdir(&layout::manifests_root(self.root())) {
            return Err(HbError::UnsupportedLegacyRepository(PathBuf::from(
                self.root(),
            )));
        }
        Err(HbError::NotInitialized(PathBuf::from(self.root())))
    }
}

/// Parses a CLI destination string and opens the corresponding backend. If
/// the string contains a `:` before any `/`, it is treated as
/// `[user@]host:path` and opened over SFTP; otherwise it is a local path.
pub fn open(destination: &str) -> Result<Box<dyn Backend>> {
    if is_remote_destination(destination) {
        Ok(Box::new(remote::RemoteBackend::connect(destination)?))
    } else {
        Ok(Box::new(local::LocalBackend::new(destination)))
    }
}

fn is_remote_destination(destination: &str) -> bool {
    match (destination.find(':'), destination.find('/')) {
        (Some(colon), Some(slash)) => colon < slash,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_are_not_remote() {
        assert!(!is_remote_destination("/var/backups/repo"));
        assert!(!is_remote_destination("relative/path"));
        assert!(!is_remote_destination("C:/not/windows/but/no/colon/before/slash"));
    }

    #[test]
    fn host_colon_path_is_remote() {
        assert!(is_remote_destination("backuphost:repo"));
        assert!(is_remote_destination("user@backuphost:/srv/backups"));
    }

    #[test]
    fn colon_after_slash_is_not_remote() {
        assert!(!is_remote_destination("/mnt/data/time:stamped"));
    }
}
