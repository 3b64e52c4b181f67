//! # Repository Layout
//!
//! Pure functions computing paths within a repository and encoding/decoding
//! namespace names for use as directory components. Paths are plain,
//! POSIX-joined strings rather than `std::path::Path`, because a repository
//! root may live on a remote host addressed over SFTP, where path semantics
//! are always `/`-separated regardless of the client's own platform. Both
//! the local and remote backends build their on-disk paths through these
//! same helpers, so the two layouts agree byte-for-byte.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters that must be percent-encoded in a namespace before the `%`→`=`
/// substitution. Mirrors the safe set used by `urllib.parse.quote` in the
/// original Python implementation: everything except unreserved characters.
const NAMESPACE_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Joins two POSIX path components, trimming a trailing `/` from the base.
pub fn join(base: &str, part: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), part)
}

/// All two-character hex bucket names, `"00"` through `"ff"`.
pub fn buckets() -> impl Iterator<Item = String> {
    (0u16..256).map(|n| format!("{n:02x}"))
}

/// Path of the `objects/<bucket>` directory for a bucket name.
pub fn bucket_dir(repo: &str, bucket: &str) -> String {
    join(&join(repo, "objects"), bucket)
}

/// Path of the content object for a given hex MD5 hash. v1 repositories use
/// a single two-character bucket level (see SPEC_FULL.md §4, ambiguity #2 —
/// the original source's four-level bucketing is not replicated here).
pub fn object_path(repo: &str, hash: &str) -> String {
    join(&bucket_dir(repo, &hash[0..2]), hash)
}

/// Path of the manifest directory for a (not yet encoded) namespace.
pub fn manifest_dir(repo: &str, namespace: &str) -> String {
    join(&manifests_root(repo), &encode_ns(namespace))
}

/// Path of the repository config record.
pub fn config_path(repo: &str) -> String {
    join(repo, "hashedbackup.json")
}

/// Path of the README placed in a freshly initialized repository.
pub fn readme_path(repo: &str) -> String {
    join(repo, "README.txt")
}

/// Path of the `tmp/` staging directory.
pub fn tmp_dir(repo: &str) -> String {
    join(repo, "tmp")
}

/// Path of the `manifests/` directory.
pub fn manifests_root(repo: &str) -> String {
    join(repo, "manifests")
}

/// Path of the `objects/` directory.
pub fn objects_root(repo: &str) -> String {
    join(repo, "objects")
}

/// A fresh path under `tmp/` for a staging write. The UUID component makes
/// concurrent writers (e.g. two snapshot runs racing against one repository)
/// collision-free.
pub fn temp_path(repo: &str) -> String {
    join(&tmp_dir(repo), &temp_filename())
}

fn temp_filename() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Encodes a namespace for use as a filesystem directory name: percent-encode
/// the string, then replace every `%` with `=`. `=` was chosen because it
/// never appears in the output of percent-encoding.
pub fn encode_ns(namespace: &str) -> String {
    let encoded = utf8_percent_encode(namespace, NAMESPACE_ENCODE_SET).to_string();
    encoded.replace('%', "=")
}

/// Reverses [`encode_ns`]: replace `=` with `%`, then percent-decode.
pub fn decode_ns(encoded: &str) -> String {
    let restored = encoded.replace('=', "%");
    percent_decode_str(&restored).decode_utf8_lossy().into_owned()
}
