// src/watch/path_utils.rs

//! Utility functions for path handling in the watcher.

use std::path::Path;

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// - First we try a direct `strip_prefix(root)`.
/// - If that fails (e.g. due to symlinks or different absolute prefixes),
///   we canonicalize both paths and try again.
/// - Only if both attempts fail do we give up.
///
/// A leading `./` is dropped so `"./src/a.rs"` under `"."` yields `"src/a.rs"`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(normalize(rel));
    }

    // Different absolute prefixes may name the same directory (macOS
    // /private/var, symlinked checkouts).
    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(normalize(rel));
        }
    }

    None
}

/// True if `path` is `dir` or lies beneath it.
pub fn is_within(dir: &Path, path: &Path) -> bool {
    path.starts_with(dir)
}

fn normalize(rel: &Path) -> String {
    let s = rel.to_string_lossy().replace('\\', "/");
    match s.strip_prefix("./") {
        Some(stripped) => stripped.to_string(),
        None => s,
    }
}
