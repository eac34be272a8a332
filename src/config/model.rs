// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::RecordStorageMode;

/// Default debounce window for change batches.
pub const DEFAULT_AGGREGATE_TIMEOUT_MS: u64 = 200;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [watch]
/// aggregate_timeout_ms = 200
/// ignored = [".git/**"]
///
/// [build]
/// cmd = "cargo build"
/// watch = ["src/**/*.rs", "Cargo.toml"]
/// exclude = ["target/**"]
/// records = "file"
/// ```
///
/// `[watch]` is optional; `[build]` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watch: WatchSection,

    pub build: BuildSection,
}

/// Validated configuration. Construct via `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub watch: WatchSection,
    pub build: BuildSection,
}

impl ConfigFile {
    /// Build without validation; only `validate.rs` should call this.
    pub(crate) fn new_unchecked(watch: WatchSection, build: BuildSection) -> Self {
        Self { watch, build }
    }

    /// Runtime watcher configuration derived from `[watch]`.
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            aggregate_timeout: Duration::from_millis(self.watch.aggregate_timeout_ms),
            ignored: self.watch.ignored.clone(),
            root: None,
        }
    }

    /// Session options derived from `[watch]` and `[build]`.
    pub fn session_options(&self) -> crate::engine::SessionOptions {
        crate::engine::SessionOptions {
            watch: self.watch_config(),
            max_passes: self.build.max_passes,
        }
    }
}

/// `[watch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    /// Delay after the first change before a batch is reported; further
    /// changes inside the window extend it.
    #[serde(default = "default_aggregate_timeout_ms")]
    pub aggregate_timeout_ms: u64,

    /// Glob patterns (relative to the project root) the watcher drops.
    #[serde(default)]
    pub ignored: Vec<String>,
}

fn default_aggregate_timeout_ms() -> u64 {
    DEFAULT_AGGREGATE_TIMEOUT_MS
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            aggregate_timeout_ms: default_aggregate_timeout_ms(),
            ignored: Vec::new(),
        }
    }
}

/// `[build]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSection {
    /// Shell command that performs the build.
    pub cmd: String,

    /// Glob patterns selecting the build's input files.
    #[serde(default)]
    pub watch: Vec<String>,

    /// Glob patterns removed from `watch`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Where build records are persisted.
    #[serde(default)]
    pub records: RecordStorageMode,

    /// Re-hash inputs after the command runs and request another pass
    /// when the command rewrote any of them.
    #[serde(default)]
    pub converge: bool,

    /// Upper bound on passes per cycle; unbounded when absent.
    #[serde(default)]
    pub max_passes: Option<u32>,
}

/// Watcher configuration, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub aggregate_timeout: Duration,
    pub ignored: Vec<String>,
    /// Directory the `ignored` globs are relative to. Paths outside it,
    /// or every path when unset, are matched as given.
    pub root: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            aggregate_timeout: Duration::from_millis(DEFAULT_AGGREGATE_TIMEOUT_MS),
            ignored: Vec::new(),
            root: None,
        }
    }
}

impl WatchConfig {
    /// Default config with a different debounce window.
    pub fn with_aggregate_timeout(aggregate_timeout: Duration) -> Self {
        Self {
            aggregate_timeout,
            ..Self::default()
        }
    }

    /// Resolve `ignored` globs against `root`.
    pub fn rooted_at(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }
}
