// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::fs::FileSystem;
use crate::watch::path_utils::relative_str;

/// Directory (relative to the project root) holding rewatch's own state.
pub const STATE_DIR: &str = ".rewatch";

/// Directories never descended into while scanning for inputs.
const SKIPPED_DIRS: &[&str] = &[STATE_DIR, ".git"];

/// Compiled `watch` / `exclude` glob patterns describing a build's inputs.
///
/// Patterns are relative to the project root; [`matches`](Self::matches)
/// takes forward-slash relative paths such as `"src/main.rs"`.
#[derive(Clone)]
pub struct DependencyPatterns {
    watch: Vec<String>,
    watch_set: GlobSet,
    exclude_set: GlobSet,
}

impl fmt::Debug for DependencyPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyPatterns")
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

impl DependencyPatterns {
    /// Compile the patterns. `.rewatch/**` is always excluded so writing
    /// records never looks like an input change.
    pub fn new(watch: &[String], exclude: &[String]) -> Result<Self> {
        let watch_set = build_globset(watch).context("building watch globset")?;

        let mut excludes = exclude.to_vec();
        excludes.push(format!("{STATE_DIR}/**"));
        let exclude_set = build_globset(&excludes).context("building exclude globset")?;

        Ok(Self {
            watch: watch.to_vec(),
            watch_set,
            exclude_set,
        })
    }

    /// Returns true if `rel_path` is a build input.
    pub fn matches(&self, rel_path: &str) -> bool {
        self.watch_set.is_match(rel_path) && !self.exclude_set.is_match(rel_path)
    }

    /// Directories under which new inputs can appear: the literal prefix of
    /// every glob pattern (`src/**/*.rs` -> `<root>/src`).
    pub fn context_dirs(&self, root: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .watch
            .iter()
            .filter_map(|pat| glob_base(pat))
            .map(|base| if base.is_empty() { root.to_path_buf() } else { root.join(base) })
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Patterns without glob syntax, resolved against `root`. These name a
    /// single file each and are watched even while they do not exist.
    pub fn literal_paths(&self, root: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .watch
            .iter()
            .filter(|pat| !has_glob_meta(pat))
            .map(|pat| root.join(pat))
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Leading path components of `pattern` that contain no glob syntax.
///
/// Returns `None` for fully literal patterns.
fn glob_base(pattern: &str) -> Option<String> {
    if !has_glob_meta(pattern) {
        return None;
    }
    let literal: Vec<&str> = pattern
        .split('/')
        .take_while(|component| !has_glob_meta(component))
        .collect();
    Some(literal.join("/"))
}

/// Collect all files under `root` matching `patterns`.
///
/// The returned list is sorted.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &DependencyPatterns,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            if fs.is_dir(&path) {
                let skipped = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name));
                if !skipped {
                    stack.push(path);
                }
            } else if fs.is_file(&path) {
                if let Some(rel) = relative_str(root, &path) {
                    if patterns.matches(&rel) {
                        files.push(path);
                    }
                }
            }
        }
    }

    files.sort();
    Ok(files)
}
