// src/types.rs

//! Plain data shared between the session driver, the pipeline and the
//! watcher: timestamp snapshots, build inputs, change batches and build
//! snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Deserialize;

/// Per-path record handed to the pipeline.
///
/// Only `safe_time` exists today; the wrapper keeps the watcher's raw
/// `(path, time)` output decoupled from what the pipeline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimestamp {
    /// Latest modification time known to be stable for this path.
    pub safe_time: SystemTime,
}

/// Immutable mapping from watched path to its last known safe time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampSnapshot {
    entries: BTreeMap<PathBuf, FileTimestamp>,
}

impl TimestampSnapshot {
    /// Re-key raw watcher output into a snapshot.
    ///
    /// If a path appears more than once the latest time wins.
    pub fn from_raw<I>(raw: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, SystemTime)>,
    {
        let mut entries: BTreeMap<PathBuf, FileTimestamp> = BTreeMap::new();
        for (path, time) in raw {
            entries
                .entry(path)
                .and_modify(|ts| {
                    if time > ts.safe_time {
                        ts.safe_time = time;
                    }
                })
                .or_insert(FileTimestamp { safe_time: time });
        }
        Self { entries }
    }

    pub fn get(&self, path: &Path) -> Option<&FileTimestamp> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FileTimestamp)> {
        self.entries.iter().map(|(p, ts)| (p.as_path(), ts))
    }

    /// Most recent safe time across all entries.
    pub fn latest(&self) -> Option<SystemTime> {
        self.entries.values().map(|ts| ts.safe_time).max()
    }
}

impl FromIterator<(PathBuf, SystemTime)> for TimestampSnapshot {
    fn from_iter<T: IntoIterator<Item = (PathBuf, SystemTime)>>(iter: T) -> Self {
        Self::from_raw(iter)
    }
}

/// What a watcher reports once a burst of changes has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub file_timestamps: TimestampSnapshot,
    pub context_timestamps: TimestampSnapshot,
    pub removed_files: Vec<PathBuf>,
    pub changed_files: Vec<PathBuf>,
    pub changed_contexts: Vec<PathBuf>,
}

/// Explicit inputs for the next `compile` invocation.
///
/// Owned by the session driver and replaced wholesale whenever the
/// watcher reports a batch or an external invalidation snapshots the
/// active watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInputs {
    pub file_timestamps: TimestampSnapshot,
    pub context_timestamps: TimestampSnapshot,
    pub removed_files: Vec<PathBuf>,
    pub changed_files: Vec<PathBuf>,
}

impl BuildInputs {
    /// True when nothing is known yet (first build, or after teardown).
    pub fn is_empty(&self) -> bool {
        self.file_timestamps.is_empty()
            && self.context_timestamps.is_empty()
            && self.removed_files.is_empty()
            && self.changed_files.is_empty()
    }
}

/// Record of a completed build attempt.
///
/// `build` is `None` when the attempt failed before the pipeline produced
/// a result.
pub struct BuildSnapshot<O> {
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub build: Option<Arc<O>>,
}

impl<O> BuildSnapshot<O> {
    pub fn new(start_time: SystemTime, end_time: SystemTime, build: Option<Arc<O>>) -> Self {
        Self {
            start_time,
            end_time,
            build,
        }
    }

    /// Wall-clock duration of the attempt (zero if the clock went backwards).
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

// Manual impls: `O` itself need not be `Clone`/`Debug`.
impl<O> Clone for BuildSnapshot<O> {
    fn clone(&self) -> Self {
        Self {
            start_time: self.start_time,
            end_time: self.end_time,
            build: self.build.clone(),
        }
    }
}

impl<O> fmt::Debug for BuildSnapshot<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildSnapshot")
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("has_build", &self.build.is_some())
            .finish()
    }
}

/// Where the command pipeline keeps its build records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStorageMode {
    /// Store records in a file (`.rewatch/records`).
    #[default]
    File,
    /// Store records in memory only (lost on restart).
    Memory,
}
