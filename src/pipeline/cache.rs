// src/pipeline/cache.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use anyhow::bail;
use tracing::{debug, info};

use crate::errors::{Result, RewatchError};
use crate::fs::FileSystem;
use crate::pipeline::{BoxFuture, ResultCache};
use crate::watch::hash::compute_file_hash;

#[derive(Debug, Clone)]
struct CachedHash {
    modified: SystemTime,
    hash: String,
}

#[derive(Debug, Default)]
struct CacheState {
    hashes: HashMap<PathBuf, CachedHash>,
    active: bool,
    shut_down: bool,
    hits: u64,
    misses: u64,
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub active: bool,
}

/// In-memory cache of file content hashes.
///
/// An entry is reused as long as the file's modification time is the one
/// it was hashed at, so unchanged inputs are never re-read between cycles.
#[derive(Debug)]
pub struct HashCache {
    fs: Arc<dyn FileSystem>,
    state: Mutex<CacheState>,
}

impl HashCache {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hash `path`, reusing the cached value if the file has not been
    /// modified since. `known_mtime` comes from the watcher when available;
    /// otherwise the filesystem is asked.
    pub fn hash_file(&self, path: &Path, known_mtime: Option<SystemTime>) -> anyhow::Result<String> {
        let modified = match known_mtime {
            Some(t) => t,
            None => self.fs.modified(path)?,
        };

        {
            let mut state = self.lock();
            if state.shut_down {
                bail!("hash cache has been shut down");
            }
            let hit = state
                .hashes
                .get(path)
                .filter(|entry| entry.modified == modified)
                .map(|entry| entry.hash.clone());
            if let Some(hash) = hit {
                state.hits += 1;
                return Ok(hash);
            }
            state.misses += 1;
        }

        debug!(?path, "cache miss: computing hash");
        let hash = compute_file_hash(self.fs.as_ref(), path)?;
        self.lock().hashes.insert(
            path.to_path_buf(),
            CachedHash {
                modified,
                hash: hash.clone(),
            },
        );
        Ok(hash)
    }

    /// Drop the cached hash for a file (e.g. it was removed).
    pub fn invalidate(&self, path: &Path) {
        if self.lock().hashes.remove(path).is_some() {
            debug!(?path, "invalidated cached hash");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.hashes.len(),
            hits: state.hits,
            misses: state.misses,
            active: state.active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }
}

impl ResultCache for HashCache {
    fn enter_active(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.shut_down {
                return Err(RewatchError::CacheShutdown(
                    "cannot activate a cache that was shut down".to_string(),
                ));
            }
            state.active = true;
            debug!(entries = state.hashes.len(), "hash cache active");
            Ok(())
        })
    }

    fn enter_idle(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let paths: Vec<PathBuf> = self.lock().hashes.keys().cloned().collect();
            let vanished: Vec<PathBuf> = paths
                .into_iter()
                .filter(|path| !self.fs.exists(path))
                .collect();

            let mut state = self.lock();
            for path in vanished.iter() {
                state.hashes.remove(path);
            }
            state.active = false;
            debug!(
                entries = state.hashes.len(),
                pruned = vanished.len(),
                hits = state.hits,
                misses = state.misses,
                "hash cache idle"
            );
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.shut_down {
                return Err(RewatchError::CacheShutdown(
                    "cache already shut down".to_string(),
                ));
            }
            let entries = state.hashes.len();
            state.hashes.clear();
            state.active = false;
            state.shut_down = true;
            info!(entries, "hash cache shut down");
            Ok(())
        })
    }
}
