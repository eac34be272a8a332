#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use rewatch::config::{BuildSection, ConfigFile, RawConfigFile, WatchSection};
use rewatch::types::{ChangeBatch, RecordStorageMode, TimestampSnapshot};

/// Builder for `RawConfigFile` / `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            config: RawConfigFile {
                watch: WatchSection::default(),
                build: BuildSection {
                    cmd: cmd.to_string(),
                    watch: Vec::new(),
                    exclude: Vec::new(),
                    records: RecordStorageMode::default(),
                    converge: false,
                    max_passes: None,
                },
            },
        }
    }

    pub fn watch(mut self, pattern: &str) -> Self {
        self.config.build.watch.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.config.build.exclude.push(pattern.to_string());
        self
    }

    pub fn ignored(mut self, pattern: &str) -> Self {
        self.config.watch.ignored.push(pattern.to_string());
        self
    }

    pub fn aggregate_timeout_ms(mut self, ms: u64) -> Self {
        self.config.watch.aggregate_timeout_ms = ms;
        self
    }

    pub fn records(mut self, mode: RecordStorageMode) -> Self {
        self.config.build.records = mode;
        self
    }

    pub fn converge(mut self, val: bool) -> Self {
        self.config.build.converge = val;
        self
    }

    pub fn max_passes(mut self, n: u32) -> Self {
        self.config.build.max_passes = Some(n);
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for watcher change batches.
#[derive(Default)]
pub struct ChangeBatchBuilder {
    files: Vec<(PathBuf, SystemTime)>,
    contexts: Vec<(PathBuf, SystemTime)>,
    removed: Vec<PathBuf>,
    changed: Vec<PathBuf>,
    changed_contexts: Vec<PathBuf>,
}

impl ChangeBatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A modified file, at `secs` seconds after the epoch.
    pub fn changed(mut self, path: &str, secs: u64) -> Self {
        self.files.push((PathBuf::from(path), at(secs)));
        self.changed.push(PathBuf::from(path));
        self
    }

    /// A file timestamp that did not change in this batch.
    pub fn unchanged(mut self, path: &str, secs: u64) -> Self {
        self.files.push((PathBuf::from(path), at(secs)));
        self
    }

    pub fn removed(mut self, path: &str) -> Self {
        self.removed.push(PathBuf::from(path));
        self
    }

    pub fn context(mut self, dir: &str, secs: u64) -> Self {
        self.contexts.push((PathBuf::from(dir), at(secs)));
        self.changed_contexts.push(PathBuf::from(dir));
        self
    }

    pub fn build(self) -> ChangeBatch {
        ChangeBatch {
            file_timestamps: TimestampSnapshot::from_raw(self.files),
            context_timestamps: TimestampSnapshot::from_raw(self.contexts),
            removed_files: self.removed,
            changed_files: self.changed,
            changed_contexts: self.changed_contexts,
        }
    }
}

/// `UNIX_EPOCH + secs`.
pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Snapshot from `(path, secs)` pairs.
pub fn snapshot(entries: &[(&str, u64)]) -> TimestampSnapshot {
    entries
        .iter()
        .map(|(p, secs)| (PathBuf::from(p), at(*secs)))
        .collect()
}
