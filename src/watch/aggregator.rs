// src/watch/aggregator.rs

//! Debounced change bookkeeping for a single watch registration.
//!
//! The aggregator is synchronous and does no IO: the notify-backed watcher
//! feeds it raw paths with their modification times, asks it when the
//! debounce deadline is due, and drains a [`ChangeBatch`] from it. Keeping
//! this logic free of Tokio and the OS watcher keeps it unit-testable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::types::{ChangeBatch, TimestampSnapshot};
use crate::watch::WatchRequest;
use crate::watch::path_utils::{is_within, relative_str};
use crate::watch::patterns::STATE_DIR;

/// A change reported for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modified(SystemTime),
    Removed,
}

#[derive(Debug)]
pub struct ChangeAggregator {
    /// Watched files plus missing paths; both are tracked per file.
    files: BTreeSet<PathBuf>,
    dirs: Vec<PathBuf>,
    ignored: Option<GlobSet>,
    root: Option<PathBuf>,
    aggregate_timeout: Duration,
    start_time: SystemTime,

    file_times: BTreeMap<PathBuf, SystemTime>,
    context_times: BTreeMap<PathBuf, SystemTime>,

    changed_files: BTreeSet<PathBuf>,
    changed_contexts: BTreeSet<PathBuf>,
    removed: BTreeSet<PathBuf>,
    deadline: Option<Instant>,
}

impl ChangeAggregator {
    pub fn new(request: &WatchRequest) -> Result<Self> {
        let ignored = if request.config.ignored.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pat in request.config.ignored.iter() {
                builder.add(
                    Glob::new(pat).with_context(|| format!("invalid ignored pattern: {pat}"))?,
                );
            }
            Some(builder.build()?)
        };

        let mut dirs = request.dirs.clone();
        // Deepest directory first so `context_of` picks the closest one.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        Ok(Self {
            files: request
                .files
                .iter()
                .chain(request.missing.iter())
                .cloned()
                .collect(),
            dirs,
            ignored,
            root: request.config.root.clone(),
            aggregate_timeout: request.config.aggregate_timeout,
            start_time: request.start_time,
            file_times: BTreeMap::new(),
            context_times: BTreeMap::new(),
            changed_files: BTreeSet::new(),
            changed_contexts: BTreeSet::new(),
            removed: BTreeSet::new(),
            deadline: None,
        })
    }

    /// Whether `path` is relevant to this registration at all.
    pub fn is_relevant(&self, path: &Path) -> bool {
        if self.is_ignored(path) {
            return false;
        }
        self.files.contains(path) || self.context_of(path).is_some()
    }

    fn is_ignored(&self, path: &Path) -> bool {
        // Record writes land in the state dir while a cycle runs.
        if path.components().any(|c| c.as_os_str() == STATE_DIR) {
            return true;
        }
        let Some(set) = self.ignored.as_ref() else {
            return false;
        };
        match self.root.as_deref().and_then(|root| relative_str(root, path)) {
            Some(rel) => set.is_match(rel),
            None => set.is_match(path),
        }
    }

    fn context_of(&self, path: &Path) -> Option<&PathBuf> {
        self.dirs.iter().find(|dir| is_within(dir, path))
    }

    /// Record the state found by the initial scan.
    ///
    /// Anything modified after the watched build started counts as a
    /// change, so edits made while that build ran are not lost.
    pub fn seed(&mut self, path: &Path, modified: SystemTime, now: Instant) {
        if !self.is_relevant(path) {
            return;
        }
        if modified > self.start_time {
            self.record(path, ChangeKind::Modified(modified), now);
            return;
        }
        if self.files.contains(path) {
            self.file_times.insert(path.to_path_buf(), modified);
        }
        if let Some(dir) = self.context_of(path).cloned() {
            bump(&mut self.context_times, dir, modified);
        }
    }

    /// Record a change. Returns `true` if the path is watched, in which
    /// case the debounce deadline is (re)started.
    pub fn record(&mut self, path: &Path, change: ChangeKind, now: Instant) -> bool {
        if !self.is_relevant(path) {
            return false;
        }

        let time = match change {
            ChangeKind::Modified(t) => t,
            // The file is gone; its directory changed "now".
            ChangeKind::Removed => SystemTime::now(),
        };

        if self.files.contains(path) {
            match change {
                ChangeKind::Modified(t) => {
                    self.file_times.insert(path.to_path_buf(), t);
                    self.removed.remove(path);
                }
                ChangeKind::Removed => {
                    self.file_times.remove(path);
                    self.removed.insert(path.to_path_buf());
                }
            }
            self.changed_files.insert(path.to_path_buf());
        } else if matches!(change, ChangeKind::Removed) {
            self.removed.insert(path.to_path_buf());
        }

        if let Some(dir) = self.context_of(path).cloned() {
            bump(&mut self.context_times, dir.clone(), time);
            self.changed_contexts.insert(dir);
        }

        self.deadline = Some(now + self.aggregate_timeout);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn has_pending(&self) -> bool {
        !self.changed_files.is_empty() || !self.changed_contexts.is_empty() || !self.removed.is_empty()
    }

    /// Drain pending changes into a batch. Accumulated timestamps are kept.
    pub fn take_batch(&mut self) -> ChangeBatch {
        self.deadline = None;
        ChangeBatch {
            file_timestamps: self.file_timestamps(),
            context_timestamps: self.context_timestamps(),
            removed_files: std::mem::take(&mut self.removed).into_iter().collect(),
            changed_files: std::mem::take(&mut self.changed_files).into_iter().collect(),
            changed_contexts: std::mem::take(&mut self.changed_contexts).into_iter().collect(),
        }
    }

    pub fn file_timestamps(&self) -> TimestampSnapshot {
        TimestampSnapshot::from_raw(self.file_times.iter().map(|(p, t)| (p.clone(), *t)))
    }

    pub fn context_timestamps(&self) -> TimestampSnapshot {
        TimestampSnapshot::from_raw(self.context_times.iter().map(|(p, t)| (p.clone(), *t)))
    }
}

fn bump(times: &mut BTreeMap<PathBuf, SystemTime>, key: PathBuf, time: SystemTime) {
    let entry = times.entry(key).or_insert(time);
    if time > *entry {
        *entry = time;
    }
}
