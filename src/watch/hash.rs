// src/watch/hash.rs

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading file for hashing: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute a fingerprint over `(path, hash)` pairs.
///
/// Pairs are sorted by path first so the result does not depend on the
/// order files were discovered in. Paths are part of the fingerprint, so a
/// rename changes it even if the contents do not.
pub fn compute_aggregate_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a Path, &'a str)>,
{
    let mut entries: Vec<(&Path, &str)> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Hasher::new();
    for (path, hash) in entries {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
    }

    let hash = hasher.finalize().to_hex().to_string();
    debug!(hash = %hash, "computed aggregate hash");
    hash
}
