// src/pipeline/records.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::watch::patterns::STATE_DIR;

/// Relative path (from the project root) to the records file.
///
/// The effective path on disk is `<root>/.rewatch/records`.
pub const RECORDS_FILE_PATH: &str = "records";

fn records_file_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(RECORDS_FILE_PATH)
}

/// Fingerprint of the last emitted build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRecords {
    /// Aggregate hash over every input file.
    pub fingerprint: String,
    /// Per-file content hashes.
    pub files: BTreeMap<PathBuf, String>,
}

/// Abstract storage for build records.
pub trait RecordStore: Send + Sync {
    fn load(&self) -> Result<Option<BuildRecords>>;
    fn save(&mut self, records: &BuildRecords) -> Result<()>;
}

/// Stores records in `<root>/.rewatch/records`.
///
/// Format, one entry per line:
///
/// ```text
/// fingerprint <aggregate-hash>
/// <file-hash> <path>
/// ```
#[derive(Debug)]
pub struct FileRecordStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileRecordStore {
    pub fn new(root: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        Self { root, fs }
    }

    pub fn path(&self) -> PathBuf {
        records_file_path(&self.root)
    }
}

impl RecordStore for FileRecordStore {
    fn load(&self) -> Result<Option<BuildRecords>> {
        let path = self.path();

        if !self.fs.exists(&path) {
            debug!(?path, "no records file yet");
            return Ok(None);
        }

        let contents = self
            .fs
            .read_to_string(&path)
            .with_context(|| format!("reading records file at {:?}", path))?;
        let records = parse_records(&contents)
            .with_context(|| format!("parsing records file at {:?}", path))?;

        info!(files = records.files.len(), "loaded build records (file)");
        Ok(Some(records))
    }

    fn save(&mut self, records: &BuildRecords) -> Result<()> {
        let path = self.path();
        let contents = render_records(records);
        self.fs
            .write(&path, contents.as_bytes())
            .with_context(|| format!("writing records file at {:?}", path))?;
        info!(
            fingerprint = %records.fingerprint,
            files = records.files.len(),
            "stored build records (file)"
        );
        Ok(())
    }
}

/// Stores records in memory only.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Option<BuildRecords>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self { records: None }
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self) -> Result<Option<BuildRecords>> {
        Ok(self.records.clone())
    }

    fn save(&mut self, records: &BuildRecords) -> Result<()> {
        self.records = Some(records.clone());
        info!(fingerprint = %records.fingerprint, "stored build records (memory)");
        Ok(())
    }
}

fn parse_records(contents: &str) -> Result<BuildRecords> {
    let mut records = BuildRecords::default();
    let mut saw_fingerprint = false;

    for (lineno, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((head, rest)) = trimmed.split_once(' ') else {
            bail!("line {}: expected two fields", lineno + 1);
        };
        if head == "fingerprint" {
            records.fingerprint = rest.trim().to_string();
            saw_fingerprint = true;
        } else {
            records.files.insert(PathBuf::from(rest), head.to_string());
        }
    }

    if !saw_fingerprint {
        bail!("missing fingerprint line");
    }
    Ok(records)
}

fn render_records(records: &BuildRecords) -> String {
    let mut out = format!("fingerprint {}\n", records.fingerprint);
    for (path, hash) in records.files.iter() {
        out.push_str(hash);
        out.push(' ');
        out.push_str(&path.to_string_lossy());
        out.push('\n');
    }
    out
}
