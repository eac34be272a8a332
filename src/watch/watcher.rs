// src/watch/watcher.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{Result, RewatchError};
use crate::fs::FileSystem;
use crate::types::TimestampSnapshot;
use crate::watch::aggregator::{ChangeAggregator, ChangeKind};
use crate::watch::{WatchFileSystem, WatchId, WatchRequest, WatchSink, WatcherHandle};

/// [`WatchFileSystem`] backed by the platform's recommended `notify` watcher.
#[derive(Debug, Clone)]
pub struct NotifyWatchFileSystem {
    fs: Arc<dyn FileSystem>,
}

impl NotifyWatchFileSystem {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

struct Shared {
    aggregator: ChangeAggregator,
    paused: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle for one notify registration.
///
/// Dropping (or closing) the handle stops the event task and releases the
/// OS watcher.
pub struct NotifyWatcherHandle {
    id: WatchId,
    shared: Arc<Mutex<Shared>>,
    task: tokio::task::JoinHandle<()>,
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for NotifyWatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcherHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for NotifyWatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl WatcherHandle for NotifyWatcherHandle {
    fn pause(&mut self) {
        lock(&self.shared).paused = true;
        debug!(watch_id = %self.id, "watcher paused");
    }

    fn close(self: Box<Self>) {
        debug!(watch_id = %self.id, "watcher closed");
        drop(self);
    }

    fn file_timestamps(&self) -> TimestampSnapshot {
        lock(&self.shared).aggregator.file_timestamps()
    }

    fn context_timestamps(&self) -> TimestampSnapshot {
        lock(&self.shared).aggregator.context_timestamps()
    }
}

impl WatchFileSystem for NotifyWatchFileSystem {
    fn watch(&self, request: WatchRequest, sink: WatchSink) -> Result<Box<dyn WatcherHandle>> {
        let id = sink.id();
        let mut aggregator = ChangeAggregator::new(&request)?;

        // Channel from the blocking notify callback into the async world.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver only goes away when the handle is dropped.
                let _ = event_tx.send(res);
            },
            Config::default(),
        )?;

        let targets = watch_targets(self.fs.as_ref(), &request);
        for (path, mode) in targets.iter() {
            if let Err(err) = watcher.watch(path, *mode) {
                warn!(watch_id = %id, ?path, error = %err, "failed to watch path");
            }
        }

        // Initial scan, so changes made while the build ran are reported.
        let now = Instant::now();
        for path in request
            .files
            .iter()
            .chain(request.dirs.iter())
            .chain(request.missing.iter())
        {
            if let Ok(modified) = self.fs.modified(path) {
                aggregator.seed(path, modified, now);
            }
        }

        info!(
            watch_id = %id,
            files = request.files.len(),
            dirs = request.dirs.len(),
            missing = request.missing.len(),
            targets = targets.len(),
            "file watcher started"
        );

        let shared = Arc::new(Mutex::new(Shared {
            aggregator,
            paused: false,
        }));

        let task = tokio::spawn(event_loop(
            Arc::clone(&self.fs),
            Arc::clone(&shared),
            sink,
            event_rx,
        ));

        Ok(Box::new(NotifyWatcherHandle {
            id,
            shared,
            task,
            _inner: watcher,
        }))
    }
}

/// OS-level registrations for a request, deduplicated by path.
///
/// - context directories: recursive
/// - files: their parent directory, non-recursive
/// - missing paths: nearest existing ancestor, non-recursive
fn watch_targets(fs: &dyn FileSystem, request: &WatchRequest) -> BTreeMap<PathBuf, RecursiveMode> {
    let mut targets: BTreeMap<PathBuf, RecursiveMode> = BTreeMap::new();

    for dir in request.dirs.iter() {
        if fs.is_dir(dir) {
            targets.insert(dir.clone(), RecursiveMode::Recursive);
        } else if let Some(ancestor) = existing_ancestor(fs, dir) {
            targets.entry(ancestor).or_insert(RecursiveMode::NonRecursive);
        }
    }

    for path in request.files.iter().chain(request.missing.iter()) {
        if let Some(ancestor) = existing_ancestor(fs, path) {
            targets.entry(ancestor).or_insert(RecursiveMode::NonRecursive);
        }
    }

    targets
}

fn existing_ancestor(fs: &dyn FileSystem, path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|p| !p.as_os_str().is_empty() && fs.is_dir(p))
        .map(Path::to_path_buf)
}

async fn event_loop(
    fs: Arc<dyn FileSystem>,
    shared: Arc<Mutex<Shared>>,
    sink: WatchSink,
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    let id = sink.id();

    loop {
        let deadline = lock(&shared).aggregator.deadline();
        // `sleep_until` is built even when the branch is disabled.
        let sleep_target = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            maybe = event_rx.recv() => {
                match maybe {
                    Some(Ok(event)) => {
                        if !handle_notify_event(fs.as_ref(), &shared, &sink, event) {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(watch_id = %id, error = %err, "file watch error");
                        lock(&shared).paused = true;
                        if !sink.batch(Err(RewatchError::NotifyError(err))) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(sleep_target)), if deadline.is_some() => {
                if !flush_batch(&shared, &sink) {
                    break;
                }
            }
        }
    }

    debug!(watch_id = %id, "watcher event loop finished");
}

/// Feed one notify event into the aggregator. Returns `false` once the
/// session has gone away.
fn handle_notify_event(
    fs: &dyn FileSystem,
    shared: &Mutex<Shared>,
    sink: &WatchSink,
    event: Event,
) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return true;
    }

    let now = Instant::now();
    for path in event.paths {
        let change = if fs.exists(&path) {
            ChangeKind::Modified(fs.modified(&path).unwrap_or_else(|_| SystemTime::now()))
        } else {
            ChangeKind::Removed
        };

        let (relevant, paused) = {
            let mut guard = lock(shared);
            let relevant = guard.aggregator.record(&path, change, now);
            (relevant, guard.paused)
        };

        if relevant && !paused {
            let at = match change {
                ChangeKind::Modified(t) => t,
                ChangeKind::Removed => SystemTime::now(),
            };
            debug!(watch_id = %sink.id(), ?path, "watched path changed");
            if !sink.path_changed(path, at) {
                return false;
            }
        }
    }
    true
}

/// Emit the pending batch if the debounce window elapsed. The watcher
/// pauses itself after emitting.
fn flush_batch(shared: &Mutex<Shared>, sink: &WatchSink) -> bool {
    let batch = {
        let mut guard = lock(shared);
        if !guard.aggregator.is_due(Instant::now()) {
            return true;
        }
        let had_changes = guard.aggregator.has_pending();
        let batch = guard.aggregator.take_batch();
        if guard.paused || !had_changes {
            return true;
        }
        guard.paused = true;
        batch
    };

    info!(
        watch_id = %sink.id(),
        changed = batch.changed_files.len(),
        contexts = batch.changed_contexts.len(),
        removed = batch.removed_files.len(),
        "change batch settled"
    );
    sink.batch(Ok(batch))
}
