//! # Hashing & Streaming
//!
//! Streaming MD5 over any reader, plus a combined copy-and-hash helper used
//! when an object is written into the repository: the bytes only need to be
//! read once to both land in the destination and produce the key they will
//! be stored under.
//!
//! MD5 is used purely as a content identifier for deduplication, not as a
//! cryptographic integrity guarantee against an adversary. Existing
//! repositories are keyed by MD5 hex digests, so the algorithm choice is
//! fixed for on-disk compatibility.

use crate::error::Result;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Read buffer size for streaming hash/copy operations.
const BUF_SIZE: usize = 1024 * 1024;

/// Computes the lowercase hex MD5 digest of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

/// Computes the lowercase hex MD5 digest of in-memory bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    hex(&Md5::digest(data))
}

/// Copies every byte from `src` to `dst`, returning the lowercase hex MD5
/// digest of the bytes that passed through. Used when storing a new object:
/// the copy and the integrity hash are computed in a single pass.
pub fn copy_and_hash<R: Read, W: Write + ?Sized>(src: &mut R, dst: &mut W) -> Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
