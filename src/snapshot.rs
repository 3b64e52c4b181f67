//! # Snapshot Engine
//!
//! Drives a single backup run: validate inputs, pre-flight the backend's
//! known object hashes, walk the source tree writing directory and file
//! records as it goes, and commit the manifest. See §4.6 of the
//! specification this crate implements for the full algorithm; this module
//! mirrors the teacher crate's `backup_target` in structure (walk, hash,
//! dedup, record, summarize) while replacing BLAKE3+zstd+AES-GCM storage
//! with content-addressed MD5 objects behind the `Backend` trait.

use crate::backend::{self, Backend, StoreMode};
use crate::error::{HbError, Result};
use crate::fileinfo::{self, FileInfo};
use crate::manifest::{self, ManifestWriter, Stat};
use chrono::Utc;
use colored::Colorize;
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Instant;
use walkdir::{DirEntry, WalkDir};

const IGNORE_NAMES: &[&str] = &[".DS_Store", ".Trashes", ".fseventsd", ".Spotlight-V100"];

/// Resolves the mutually-exclusive `symlink`/`hardlink` flags into a single
/// [`StoreMode`], failing fast per §4.6 if both are set. Shared by the CLI
/// and the profile reader so the rule lives in exactly one place.
pub fn resolve_store_mode(symlink: bool, hardlink: bool) -> Result<StoreMode> {
    match (symlink, hardlink) {
        (true, true) => Err(HbError::InvalidConfig(
            "symlink and hardlink are mutually exclusive".to_string(),
        )),
        (true, false) => Ok(StoreMode::Symlink),
        (false, true) => Ok(StoreMode::Hardlink),
        (false, false) => Ok(StoreMode::Copy),
    }
}

pub struct SnapshotConfig<'a> {
    pub source_root: &'a Path,
    pub destination: &'a str,
    pub namespace: &'a str,
    pub store_mode: StoreMode,
    pub if_older_than: Option<chrono::Duration>,
    pub log_uploaded: bool,
    pub progress: Option<&'a ProgressBar>,
}

#[derive(Debug, Default, Clone)]
pub struct SnapshotOutcome {
    pub manifest_path: String,
    pub total_bytes: u64,
    pub n_cached: u64,
    pub n_updated: u64,
    pub n_objects_added: u64,
    pub n_objects_exist: u64,
    pub uploaded_bytes: u64,
    pub duration: std::time::Duration,
}

#[derive(Debug)]
pub enum RunResult {
    Completed(SnapshotOutcome),
    Skipped,
}

/// Runs one backup per the sequence in §4.6: resolve + validate the
/// backend, validate the source, honor `if_older_than`, pre-flight known
/// hashes, walk and record, then commit.
pub fn run(config: &SnapshotConfig) -> Result<RunResult> {
    let backend = backend::open(config.destination)?;
    backend.check_valid()?;

    if !config.source_root.is_dir() {
        return Err(HbError::InvalidSource(format!(
            "{} does not exist or is not a directory",
            config.source_root.display()
        )));
    }
    if fs::read_dir(config.source_root)?.next().is_none() {
        return Err(HbError::InvalidSource(format!(
            "{} is empty",
            config.source_root.display()
        )));
    }

    if let Some(threshold) = config.if_older_than {
        if let Some(age) = manifest::newest_manifest_age(backend.as_ref(), config.namespace, Utc::now())? {
            if age < threshold {
                return Ok(RunResult::Skipped);
            }
        }
    }

    let mut seen_hashes = backend.enumerate_object_hashes();
    let mut writer = ManifestWriter::create(
        backend.as_ref(),
        config.namespace,
        &config.source_root.to_string_lossy(),
    )?;

    let mut stats = SnapshotOutcome::default();
    let start = Instant::now();

    let walker = WalkDir::new(config.source_root)
        .into_iter()
        .filter_entry(|e| !is_excluded(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                eprintln!("warning: {err}");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let relative = relative_path(config.source_root, entry.path());

        if entry.file_type().is_dir() {
            match FileInfo::inspect(entry.path()) {
                Ok(info) => writer.add_dir(&relative, Stat::from_file_info(&info))?,
                Err(_) => eprintln!(
                    "warning: could not stat directory {}",
                    entry.path().display()
                ),
            }
            continue;
        }

        if !entry.file_type().is_file() {
            eprintln!(
                "warning: skipping non-regular entry {}",
                entry.path().display()
            );
            continue;
        }

        if let Err(e) = handle_file(
            entry.path(),
            &relative,
            backend.as_ref(),
            &mut seen_hashes,
            &mut writer,
            &mut stats,
            config.store_mode,
            config.log_uploaded,
        ) {
            eprintln!("warning: skipping {}: {e}", entry.path().display());
        }

        if let Some(pb) = config.progress {
            pb.inc(1);
            pb.set_message(truncate(&relative, 40));
        }
    }

    stats.manifest_path = writer.commit()?;
    stats.duration = start.elapsed();

    if let Some(pb) = config.progress {
        pb.finish_with_message("done");
    }

    Ok(RunResult::Completed(stats))
}

#[allow(clippy::too_many_arguments)]
fn handle_file(
    path: &Path,
    relative: &str,
    backend: &dyn Backend,
    seen_hashes: &mut HashSet<String>,
    writer: &mut ManifestWriter,
    stats: &mut SnapshotOutcome,
    store_mode: StoreMode,
    log_uploaded: bool,
) -> Result<()> {
    let info = FileInfo::inspect(path)?;
    if !info.is_regular {
        eprintln!("warning: skipping non-regular file {}", path.display());
        return Ok(());
    }

    let (hash, from_cache) = fileinfo::hash_with_cache(&info)?;
    if from_cache {
        stats.n_cached += 1;
    } else {
        stats.n_updated += 1;
    }

    let added = if seen_hashes.contains(&hash) {
        false
    } else {
        backend.add_object(&hash, path, store_mode)?
    };
    seen_hashes.insert(hash.clone());

    if added {
        stats.n_objects_added += 1;
        stats.uploaded_bytes += info.size;
        if log_uploaded {
            eprintln!("  {} {relative}", "+".green());
        }
    } else {
        stats.n_objects_exist += 1;
    }

    stats.total_bytes += info.size;
    writer.add_file(relative, info.size, &hash, Stat::from_file_info(&info))
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if IGNORE_NAMES.contains(&name.as_ref()) || name.starts_with("._") {
        return true;
    }
    fileinfo::has_exclude_xattr(entry.path())
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn truncate(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        path.to_string()
    } else {
        format!("…{}", &path[path.len() - max_len + 1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_store_mode_rejects_both_flags() {
        let err = resolve_store_mode(true, true).unwrap_err();
        assert!(matches!(err, HbError::InvalidConfig(_)));
    }

    #[test]
    fn resolve_store_mode_defaults_to_copy() {
        assert_eq!(resolve_store_mode(false, false).unwrap(), StoreMode::Copy);
    }

    fn init_minimal_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for d in ["objects", "manifests", "tmp"] {
            fs::create_dir(dir.path().join(d)).unwrap();
        }
        for bucket in crate::layout::buckets() {
            fs::create_dir(dir.path().join("objects").join(bucket)).unwrap();
        }
        std::fs::write(dir.path().join("hashedbackup.json"), r#"{"version":1}"#).unwrap();
        dir
    }

    #[test]
    fn run_rejects_missing_source() {
        let repo = init_minimal_repo();
        let source = tempfile::tempdir().unwrap();
        let missing = source.path().join("does-not-exist");

        let config = SnapshotConfig {
            source_root: &missing,
            destination: repo.path().to_str().unwrap(),
            namespace: "ns",
            store_mode: StoreMode::Copy,
            if_older_than: None,
            log_uploaded: false,
            progress: None,
        };
        let err = run(&config).unwrap_err();
        assert!(matches!(err, HbError::InvalidSource(_)));
    }

    #[test]
    fn run_rejects_empty_source() {
        let repo = init_minimal_repo();
        let source = tempfile::tempdir().unwrap();

        let config = SnapshotConfig {
            source_root: source.path(),
            destination: repo.path().to_str().unwrap(),
            namespace: "ns",
            store_mode: StoreMode::Copy,
            if_older_than: None,
            log_uploaded: false,
            progress: None,
        };
        let err = run(&config).unwrap_err();
        assert!(matches!(err, HbError::InvalidSource(_)));
    }

    #[test]
    fn run_dedups_identical_content_across_two_files() {
        let repo = init_minimal_repo();
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.txt"), b"abcd").unwrap();
        fs::create_dir(source.path().join("dir")).unwrap();
        fs::write(source.path().join("dir").join("b.txt"), b"abcd").unwrap();

        let config = SnapshotConfig {
            source_root: source.path(),
            destination: repo.path().to_str().unwrap(),
            namespace: "n",
            store_mode: StoreMode::Copy,
            if_older_than: None,
            log_uploaded: false,
            progress: None,
        };
        let outcome = match run(&config).unwrap() {
            RunResult::Completed(o) => o,
            RunResult::Skipped => panic!("unexpected skip"),
        };

        assert_eq!(outcome.n_objects_added, 1);
        assert_eq!(outcome.n_objects_exist, 1);

        let obj_path = crate::layout::object_path(
            repo.path().to_str().unwrap(),
            "e2fc714c4727ee9395f324cd2e7f331f",
        );
        assert!(Path::new(&obj_path).exists());

        let records = manifest::read_records(
            &crate::backend::local::LocalBackend::new(repo.path().to_str().unwrap()),
            &outcome.manifest_path,
        )
        .unwrap();
        assert!(matches!(records.first(), Some(manifest::Record::Header(_))));
        assert!(matches!(records.last(), Some(manifest::Record::Eof)));
        let file_records: Vec<_> = records
            .iter()
            .filter(|r| matches!(r, manifest::Record::File(_)))
            .collect();
        assert_eq!(file_records.len(), 2);
    }

    #[test]
    fn run_skips_when_newer_than_threshold() {
        let repo = init_minimal_repo();
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("a.txt"), b"abcd").unwrap();

        let config = SnapshotConfig {
            source_root: source.path(),
            destination: repo.path().to_str().unwrap(),
            namespace: "n",
            store_mode: StoreMode::Copy,
            if_older_than: None,
            log_uploaded: false,
            progress: None,
        };
        run(&config).unwrap();

        let config_with_threshold = SnapshotConfig {
            if_older_than: Some(chrono::Duration::hours(1)),
            ..config
        };
        match run(&config_with_threshold).unwrap() {
            RunResult::Skipped => {}
            RunResult::Completed(_) => panic!("expected skip"),
        }
    }
}
