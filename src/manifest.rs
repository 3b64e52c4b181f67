//! # Snapshot Manifest
//!
//! A manifest is the append-only record a single backup run produces: one
//! JSON object per line (header, then a `d`/`f` record per directory/file
//! visited, then an end marker), the whole stream compressed with bzip2.
//! [`ManifestWriter`] accumulates records behind the compressor and
//! publishes the finished file into `manifests/<namespace>/` by rename —
//! the manifest is either wholly absent or wholly present, never
//! half-written (see [`crate::backend::local::LocalBackend::add_object`]
//! for the same publish-by-rename pattern applied to objects).

use crate::backend::Backend;
use crate::error::{HbError, Result};
use crate::fileinfo::FileInfo;
use crate::layout;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};

/// Per-entry ownership and timestamp block embedded in directory and file
/// records. `user`/`group` are best-effort name resolutions (see
/// [`crate::fileinfo::lookup_user`]) and are omitted when unresolvable.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub mtime: i64,
    pub mtime_ns: i64,
}

impl Stat {
    pub fn from_file_info(info: &FileInfo) -> Stat {
        Stat {
            mode: info.mode,
            uid: info.uid,
            gid: info.gid,
            user: crate::fileinfo::lookup_user(info.uid),
            group: crate::fileinfo::lookup_group(info.gid),
            mtime: info.mtime,
            mtime_ns: info.mtime_ns_frac,
        }
    }
}

/// The first record of every manifest. `version` names the *record format*,
/// not the repository layout version, and stays `0` even inside a v1
/// repository (SPEC_FULL.md §9, ambiguity #1) — the original tool never
/// bumped it, and there is no reader that would benefit from us doing so
/// now.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Header {
    pub version: u32,
    pub created: f64,
    pub created_human: String,
    pub hostname: String,
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DirRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub stat: Stat,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub size: u64,
    pub hash: String,
    pub stat: Stat,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct EofRecord {
    eof: bool,
}

/// A single decoded manifest line, yielded while reading a manifest back.
#[derive(Debug, Clone)]
pub enum Record {
    Header(Header),
    Dir(DirRecord),
    File(FileRecord),
    Eof,
}

fn parse_record(line: &str) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| HbError::Other(anyhow::anyhow!("corrupt manifest line: {e}")))?;
    if value.get("eof").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(Record::Eof);
    }
    let record = match value.get("type").and_then(|v| v.as_str()) {
        Some("d") => Record::Dir(serde_json::from_value(value).map_err(|e| {
            HbError::Other(anyhow::anyhow!("corrupt directory record: {e}"))
        })?),
        Some("f") => Record::File(serde_json::from_value(value).map_err(|e| {
            HbError::Other(anyhow::anyhow!("corrupt file record: {e}"))
        })?),
        _ => Record::Header(
            serde_json::from_value(value)
                .map_err(|e| HbError::Other(anyhow::anyhow!("corrupt manifest header: {e}")))?,
        ),
    };
    Ok(record)
}

/// Reads every record out of a manifest, decompressing as it goes.
pub fn read_records(backend: &dyn Backend, path: &str) -> Result<Vec<Record>> {
    let raw = backend.open_read(path)?;
    let decoder = bzip2::read::BzDecoder::new(raw);
    BufReader::new(decoder)
        .lines()
        .map(|line| parse_record(&line?))
        .collect()
}

/// Accumulates manifest records behind a bzip2 compressor and publishes the
/// finished file by rename. Dropped without calling [`commit`](Self::commit)
/// or [`cancel`](Self::cancel), the temp file is simply left behind in
/// `tmp/` — see SPEC_FULL.md §9, ambiguity #3: an interrupted backup is
/// expected to leave an orphaned temp file rather than attempt cleanup.
pub struct ManifestWriter<'b> {
    backend: &'b dyn Backend,
    temp_path: String,
    final_path: String,
    encoder: Option<BzEncoder<Box<dyn Write + 'b>>>,
}

impl<'b> ManifestWriter<'b> {
    /// Opens a fresh manifest under `manifests/<namespace>/`, named by the
    /// current UTC time, and writes its header record.
    pub fn create(backend: &'b dyn Backend, namespace: &str, root: &str) -> Result<ManifestWriter<'b>> {
        let ns_dir = layout::manifest_dir(backend.root(), namespace);
        backend.try_mkdir(&layout::manifests_root(backend.root()));
        backend.try_mkdir(&ns_dir);

        let now = Utc::now();
        let final_path = layout::join(&ns_dir, &format!("{}.manifest.bz2", now.format("%Y%m%d-%H%M%S")));
        let temp_path = backend.temp_path();

        let writer = backend.open_write(&temp_path)?;
        let encoder = BzEncoder::new(writer, Compression::best());

        let mut manifest = ManifestWriter {
            backend,
            temp_path,
            final_path,
            encoder: Some(encoder),
        };
        manifest.write_record(&Header {
            version: 0,
            created: now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1_000_000_000.0,
            created_human: now.to_rfc3339(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            root: root.to_string(),
        })?;
        Ok(manifest)
    }

    pub fn add_dir(&mut self, path: &str, stat: Stat) -> Result<()> {
        self.write_record(&DirRecord {
            kind: "d".to_string(),
            path: path.to_string(),
            stat,
        })
    }

    pub fn add_file(&mut self, path: &str, size: u64, hash: &str, stat: Stat) -> Result<()> {
        self.write_record(&FileRecord {
            kind: "f".to_string(),
            path: path.to_string(),
            size,
            hash: hash.to_string(),
            stat,
        })
    }

    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let encoder = self
            .encoder
            .as_mut()
            .expect("write called after commit/cancel");
        let line = serde_json::to_string(record)
            .map_err(|e| HbError::Other(anyhow::anyhow!("encoding manifest record: {e}")))?;
        encoder.write_all(line.as_bytes())?;
        encoder.write_all(b"\n")?;
        Ok(())
    }

    /// Writes the end marker, flushes the compressor, and publishes the
    /// manifest into its final path. Returns the final path.
    pub fn commit(mut self) -> Result<String> {
        self.write_record(&EofRecord { eof: true })?;
        let encoder = self.encoder.take().expect("commit called twice");
        let mut writer = encoder
            .finish()
            .map_err(|e| HbError::Other(anyhow::anyhow!("finishing manifest compression: {e}")))?;
        writer.flush()?;
        drop(writer);
        self.backend.rename(&self.temp_path, &self.final_path)?;
        Ok(self.final_path.clone())
    }

    /// Abandons the manifest: drops the compressor and deletes the temp
    /// file. The snapshot engine deliberately never calls this on
    /// interrupt — an interrupted run's temp file is left orphaned in
    /// `tmp/` rather than cleaned up, matching the original tool's
    /// behavior under `KeyboardInterrupt`.
    pub fn cancel(mut self) {
        self.encoder.take();
        let _ = self.backend.delete(&self.temp_path);
    }
}

/// A manifest located during a listing pass, identified by filename rather
/// than opened — cheap enough to run over every manifest in a repository.
#[derive(Debug, Clone)]
pub struct ManifestSummary {
    pub namespace: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

fn parse_manifest_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    let stem = filename.strip_suffix(".manifest.bz2")?;
    let naive = NaiveDateTime::parse_from_str(stem, "%Y%m%d-%H%M%S").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Lists manifests under a single (already-encoded) namespace directory.
fn list_in_namespace_dir(
    backend: &dyn Backend,
    namespace: &str,
    ns_dir: &str,
) -> Result<Vec<ManifestSummary>> {
    let mut found = Vec::new();
    for name in backend.listdir(ns_dir)? {
        if let Some(timestamp) = parse_manifest_timestamp(&name) {
            found.push(ManifestSummary {
                namespace: namespace.to_string(),
                path: layout::join(ns_dir, &name),
                timestamp,
            });
        }
    }
    Ok(found)
}

/// Lists manifests across the repository, optionally restricted to one
/// namespace, sorted oldest first.
pub fn list_manifests(backend: &dyn Backend, namespace: Option<&str>) -> Result<Vec<ManifestSummary>> {
    let manifests_root = layout::manifests_root(backend.root());
    let mut found = Vec::new();

    if let Some(ns) = namespace {
        let ns_dir = layout::manifest_dir(backend.root(), ns);
        if backend.isdir(&ns_dir) {
            found.extend(list_in_namespace_dir(backend, ns, &ns_dir)?);
        }
    } else {
        for encoded in backend.listdir(&manifests_root)? {
            let ns_dir = layout::join(&manifests_root, &encoded);
            if !backend.isdir(&ns_dir) {
                continue;
            }
            let decoded = layout::decode_ns(&encoded);
            found.extend(list_in_namespace_dir(backend, &decoded, &ns_dir)?);
        }
    }

    found.sort_by_key(|m| m.timestamp);
    Ok(found)
}

/// Age of the most recent manifest in `namespace`, or `None` if the
/// namespace has no manifests yet. Used by `backup --if-older-than`.
pub fn newest_manifest_age(
    backend: &dyn Backend,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<Option<chrono::Duration>> {
    let manifests = list_manifests(backend, Some(namespace))?;
    Ok(manifests.last().map(|m| now - m.timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use std::fs;

    fn init_minimal_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for d in ["objects", "manifests", "tmp"] {
            fs::create_dir(dir.path().join(d)).unwrap();
        }
        dir
    }

    #[test]
    fn write_and_read_roundtrip() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());

        let mut writer = ManifestWriter::create(&backend, "pictures", "/home/alice").unwrap();
        writer
            .add_dir(
                "/",
                Stat { mode: 755, uid: 1000, gid: 1000, user: None, group: None, mtime: 0, mtime_ns: 0 },
            )
            .unwrap();
        writer
            .add_file(
                "/a.txt",
                4,
                "e2fc714c4727ee9395f324cd2e7f331f",
                Stat { mode: 644, uid: 1000, gid: 1000, user: None, group: None, mtime: 0, mtime_ns: 0 },
            )
            .unwrap();
        let final_path = writer.commit().unwrap();

        assert!(backend.exists(&final_path));
        let tmp_entries = backend.listdir(&layout::tmp_dir(backend.root())).unwrap();
        assert!(tmp_entries.is_empty());

        let records = read_records(&backend, &final_path).unwrap();
        assert!(matches!(records[0], Record::Header(_)));
        assert!(matches!(records[1], Record::Dir(_)));
        assert!(matches!(records[2], Record::File(_)));
        assert!(matches!(records[3], Record::Eof));
    }

    #[test]
    fn cancel_deletes_temp_file() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());

        let writer = ManifestWriter::create(&backend, "pictures", "/home/alice").unwrap();
        writer.cancel();

        let tmp_entries = backend.listdir(&layout::tmp_dir(backend.root())).unwrap();
        assert!(tmp_entries.is_empty());
    }

    #[test]
    fn list_manifests_sorted_and_filtered_by_namespace() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());

        for ns in ["pictures", "documents"] {
            let mut writer = ManifestWriter::create(&backend, ns, "/home/alice").unwrap();
            writer.commit().unwrap();
        }

        let all = list_manifests(&backend, None).unwrap();
        assert_eq!(all.len(), 2);

        let pictures_only = list_manifests(&backend, Some("pictures")).unwrap();
        assert_eq!(pictures_only.len(), 1);
        assert_eq!(pictures_only[0].namespace, "pictures");
    }

    #[test]
    fn namespace_with_special_characters_roundtrips_through_listing() {
        let repo = init_minimal_repo();
        let backend = LocalBackend::new(repo.path().to_str().unwrap());

        let mut writer = ManifestWriter::create(&backend, "a/b c", "/home/alice").unwrap();
        writer.commit().unwrap();

        let found = list_manifests(&backend, Some("a/b c")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].namespace, "a/b c");
    }
}
