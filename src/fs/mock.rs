// src/fs/mock.rs

//! In-memory [`FileSystem`] for tests.
//!
//! Directories exist implicitly as ancestors of files. Every mutation
//! advances a logical clock, so modification times are strictly
//! increasing and a directory's time moves whenever an entry is added to
//! or removed from it, as on a real disk.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Result};

use super::FileSystem;

#[derive(Debug, Clone)]
struct MockFile {
    contents: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug)]
struct State {
    files: BTreeMap<PathBuf, MockFile>,
    dirs: BTreeMap<PathBuf, SystemTime>,
    clock: SystemTime,
}

impl State {
    fn tick(&mut self) -> SystemTime {
        self.clock += Duration::from_secs(1);
        self.clock
    }

    /// Create `dir` and its ancestors, touching each newly linked parent.
    fn ensure_dir(&mut self, dir: &Path, now: SystemTime) {
        if self.dirs.contains_key(dir) {
            return;
        }
        self.dirs.insert(dir.to_path_buf(), now);
        if let Some(parent) = parent_of(dir) {
            self.ensure_dir(&parent, now);
            self.dirs.insert(parent, now);
        }
    }

    fn entry_kind(&self, path: &Path) -> Option<&'static str> {
        if self.files.contains_key(path) {
            Some("file")
        } else if self.dirs.contains_key(path) {
            Some("directory")
        } else {
            None
        }
    }
}

/// `.` stands in for the parent of a bare relative name; `/` has none.
fn parent_of(path: &Path) -> Option<PathBuf> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Some(PathBuf::from(".")),
        Some(p) => Some(p.to_path_buf()),
        None => None,
    }
}

#[derive(Debug, Clone)]
pub struct MockFileSystem {
    state: Arc<Mutex<State>>,
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let mut dirs = BTreeMap::new();
        dirs.insert(PathBuf::from("."), start);

        Self {
            state: Arc::new(Mutex::new(State {
                files: BTreeMap::new(),
                dirs,
                clock: start,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or overwrite a file, stamping it with the next clock tick.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut state = self.lock();
        let now = state.tick();

        let created = state
            .files
            .insert(
                path.to_path_buf(),
                MockFile {
                    contents: contents.into(),
                    modified: now,
                },
            )
            .is_none();

        if let Some(parent) = parent_of(path) {
            state.ensure_dir(&parent, now);
            if created {
                state.dirs.insert(parent, now);
            }
        }
    }

    /// Create an empty directory (and its ancestors).
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.lock();
        let now = state.tick();
        state.ensure_dir(path.as_ref(), now);
    }

    /// Override the modification time of an existing file or directory.
    pub fn set_modified(&self, path: impl AsRef<Path>, time: SystemTime) {
        let path = path.as_ref();
        let mut state = self.lock();
        if let Some(file) = state.files.get_mut(path) {
            file.modified = time;
        } else if let Some(dir_time) = state.dirs.get_mut(path) {
            *dir_time = time;
        }
    }

    fn file_contents(&self, path: &Path) -> Result<Vec<u8>> {
        let state = self.lock();
        match state.files.get(path) {
            Some(file) => Ok(file.contents.clone()),
            None if state.dirs.contains_key(path) => bail!("Is a directory: {:?}", path),
            None => bail!("File not found: {:?}", path),
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        String::from_utf8(self.file_contents(path)?)
            .map_err(|e| anyhow!("Invalid UTF-8 in {:?}: {}", path, e))
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.file_contents(path)?)))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if state.files.remove(path).is_none() {
            match state.entry_kind(path) {
                Some(kind) => bail!("Is a {}: {:?}", kind, path),
                None => bail!("File not found: {:?}", path),
            }
        }

        let now = state.tick();
        if let Some(parent) = parent_of(path) {
            state.dirs.insert(parent, now);
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().entry_kind(path).is_some()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.lock().dirs.contains_key(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        // Tests use absolute paths throughout.
        if self.exists(path) {
            Ok(path.to_path_buf())
        } else {
            Err(anyhow!("File not found: {:?}", path))
        }
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let state = self.lock();
        state
            .files
            .get(path)
            .map(|file| file.modified)
            .or_else(|| state.dirs.get(path).copied())
            .ok_or_else(|| anyhow!("File not found: {:?}", path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.lock();
        if !state.dirs.contains_key(path) {
            bail!("Not a directory or not found: {:?}", path);
        }

        let is_child = |entry: &&PathBuf| parent_of(entry).as_deref() == Some(path);
        let mut entries: Vec<PathBuf> = state
            .files
            .keys()
            .chain(state.dirs.keys())
            .filter(is_child)
            .filter(|entry| entry.as_path() != path)
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }
}
