//! # Error Types
//!
//! Defines the error taxonomy from the specification using `thiserror`.
//! Repository-level failures (`NotInitialized`, `HashMismatch`,
//! `SizeMismatch`, ...) abort a run without publishing a manifest.
//! Per-entry failures during a walk (unreadable directory, broken symlink)
//! are logged and the offending entry skipped; they never reach this type.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes in the backup system.
#[derive(Error, Debug)]
pub enum HbError {
    #[error("repository not initialized at {0} (did you run `hashedbackup init`?)")]
    NotInitialized(PathBuf),

    #[error(
        "unsupported legacy repository at {0}: a `manifests/` directory exists but there is \
         no hashedbackup.json config record (v0 layout); manual migration is required"
    )]
    UnsupportedLegacyRepository(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("hash mismatch while storing {path}: expected {expected}, computed {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("size mismatch after transfer of {path}: expected {expected} bytes, remote reports {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("backend is not connected")]
    NotConnected,

    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_paths() {
        let e = HbError::NotInitialized(PathBuf::from("/tmp/repo"));
        assert!(e.to_string().contains("/tmp/repo"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: HbError = io_err.into();
        assert!(matches!(e, HbError::Io(_)));
    }
}
