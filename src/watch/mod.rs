// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - The watcher contract the session driver consumes
//!   ([`WatchFileSystem`], [`WatcherHandle`], [`WatchSink`]).
//! - A cross-platform implementation on top of `notify`
//!   ([`watcher::NotifyWatchFileSystem`]) with debounced batching
//!   ([`aggregator::ChangeAggregator`]).
//! - Glob patterns and content hashing used to resolve a build's inputs.
//!
//! It does **not** know about build cycles; it only turns filesystem
//! changes into timestamped change batches.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::config::WatchConfig;
use crate::errors::Result;
use crate::types::{ChangeBatch, TimestampSnapshot};

pub mod aggregator;
pub mod hash;
pub mod path_utils;
pub mod patterns;
pub mod watcher;

pub use aggregator::ChangeAggregator;
pub use hash::{compute_aggregate_hash, compute_file_hash};
pub use patterns::{collect_matching_files, DependencyPatterns};
pub use watcher::{NotifyWatchFileSystem, NotifyWatcherHandle};

/// Identifies one watch registration. A fresh id is used every time the
/// session re-arms, so events from an older registration can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// What to watch, and since when.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    /// Start of the build whose dependencies are being watched. Changes
    /// newer than this are reported even if they happened before the
    /// registration existed.
    pub start_time: SystemTime,
    pub config: WatchConfig,
}

/// Events a watcher reports back to its session.
#[derive(Debug)]
pub enum WatchEvent {
    /// One watched path changed (observability only).
    PathChanged { path: PathBuf, at: SystemTime },
    /// A burst of changes settled, or the watcher failed.
    Batch(Result<ChangeBatch>),
}

/// Channel end a watcher uses to talk to its session.
#[derive(Debug, Clone)]
pub struct WatchSink {
    id: WatchId,
    tx: mpsc::UnboundedSender<(WatchId, WatchEvent)>,
}

impl WatchSink {
    pub fn new(id: WatchId, tx: mpsc::UnboundedSender<(WatchId, WatchEvent)>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Returns `false` once the session is gone.
    pub fn path_changed(&self, path: PathBuf, at: SystemTime) -> bool {
        self.tx
            .send((self.id, WatchEvent::PathChanged { path, at }))
            .is_ok()
    }

    /// Returns `false` once the session is gone.
    pub fn batch(&self, batch: Result<ChangeBatch>) -> bool {
        self.tx.send((self.id, WatchEvent::Batch(batch))).is_ok()
    }
}

/// One live watch registration.
pub trait WatcherHandle: Send {
    /// Stop reporting events; timestamps keep being tracked.
    fn pause(&mut self);

    /// Release the registration and its OS resources.
    fn close(self: Box<Self>);

    fn file_timestamps(&self) -> TimestampSnapshot;
    fn context_timestamps(&self) -> TimestampSnapshot;
}

/// Creates watch registrations.
pub trait WatchFileSystem: Send + Sync + 'static {
    fn watch(&self, request: WatchRequest, sink: WatchSink) -> Result<Box<dyn WatcherHandle>>;
}
