// src/pipeline/command.rs

//! Build pipeline that fingerprints the configured inputs and runs a shell
//! command when the fingerprint changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::BuildSection;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::pipeline::cache::HashCache;
use crate::pipeline::records::{BuildRecords, RecordStore};
use crate::pipeline::{BoxFuture, BuildOutput, BuildPipeline};
use crate::types::BuildInputs;
use crate::watch::hash::compute_aggregate_hash;
use crate::watch::patterns::{collect_matching_files, DependencyPatterns};

/// Output of one [`CommandPipeline`] pass.
#[derive(Debug)]
pub struct CommandBuild {
    records: BuildRecords,
    changed: bool,
    files: Vec<PathBuf>,
    contexts: Vec<PathBuf>,
    missing: Vec<PathBuf>,
    /// Set by `emit_assets` when the command rewrote its own inputs.
    rerun: AtomicBool,
    /// Exit code of the build command, when it ran and failed.
    failed_exit: OnceLock<i32>,
}

impl CommandBuild {
    pub fn fingerprint(&self) -> &str {
        &self.records.fingerprint
    }

    /// Whether the fingerprint differs from the last written records.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Exit code of a build command that ran and did not succeed.
    ///
    /// A failing command still completes the cycle, so the session keeps
    /// watching and the next edit triggers another attempt.
    pub fn failed_exit_code(&self) -> Option<i32> {
        self.failed_exit.get().copied()
    }
}

impl BuildOutput for CommandBuild {
    fn should_emit(&self) -> bool {
        self.changed
    }

    fn needs_additional_pass(&self) -> bool {
        self.rerun.load(Ordering::SeqCst)
    }

    fn file_dependencies(&self) -> &[PathBuf] {
        &self.files
    }

    fn context_dependencies(&self) -> &[PathBuf] {
        &self.contexts
    }

    fn missing_dependencies(&self) -> &[PathBuf] {
        &self.missing
    }
}

#[derive(Debug, Default)]
struct RecordState {
    /// Records as last persisted (or loaded at startup).
    written: Option<BuildRecords>,
    /// Records of the most recent compile, waiting for `write_records`.
    pending: Option<BuildRecords>,
}

/// [`BuildPipeline`] that runs `[build].cmd` whenever its inputs change.
pub struct CommandPipeline {
    root: PathBuf,
    cmd: String,
    converge: bool,
    patterns: DependencyPatterns,
    fs: Arc<dyn FileSystem>,
    cache: Arc<HashCache>,
    store: Mutex<Box<dyn RecordStore>>,
    records: Mutex<RecordState>,
}

impl std::fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPipeline")
            .field("root", &self.root)
            .field("cmd", &self.cmd)
            .field("converge", &self.converge)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CommandPipeline {
    pub fn new(
        root: PathBuf,
        build: &BuildSection,
        fs: Arc<dyn FileSystem>,
        cache: Arc<HashCache>,
        store: Box<dyn RecordStore>,
    ) -> Result<Self> {
        let patterns = DependencyPatterns::new(&build.watch, &build.exclude)?;
        Ok(Self {
            root,
            cmd: build.cmd.clone(),
            converge: build.converge,
            patterns,
            fs,
            cache,
            store: Mutex::new(store),
            records: Mutex::new(RecordState::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fingerprint of the last persisted build, if any.
    pub fn written_fingerprint(&self) -> Option<String> {
        lock(&self.records)
            .written
            .as_ref()
            .map(|r| r.fingerprint.clone())
    }

    /// Files currently matching the `watch`/`exclude` patterns, sorted.
    pub fn input_files(&self) -> Result<Vec<PathBuf>> {
        Ok(collect_matching_files(
            self.fs.as_ref(),
            &self.root,
            &self.patterns,
        )?)
    }

    /// Scan the project and hash every input.
    pub fn fingerprint_inputs(&self, inputs: &BuildInputs) -> Result<(Vec<PathBuf>, BuildRecords)> {
        let files = self.input_files()?;

        let mut hashes = BTreeMap::new();
        for path in files.iter() {
            let known = inputs.file_timestamps.get(path).map(|ts| ts.safe_time);
            let hash = self.cache.hash_file(path, known)?;
            hashes.insert(path.clone(), hash);
        }

        let fingerprint =
            compute_aggregate_hash(hashes.iter().map(|(p, h)| (p.as_path(), h.as_str())));

        Ok((
            files,
            BuildRecords {
                fingerprint,
                files: hashes,
            },
        ))
    }

    /// Context directories that exist and paths that are expected but
    /// absent (literal patterns and glob prefixes not created yet).
    pub fn dependency_dirs(&self) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut contexts = Vec::new();
        let mut missing = Vec::new();

        for dir in self.patterns.context_dirs(&self.root) {
            if self.fs.is_dir(&dir) {
                contexts.push(dir);
            } else {
                missing.push(dir);
            }
        }
        for path in self.patterns.literal_paths(&self.root) {
            if !self.fs.exists(&path) {
                missing.push(path);
            }
        }

        missing.sort();
        missing.dedup();
        (contexts, missing)
    }

    /// Run `[build].cmd` in the project root, relaying its output.
    ///
    /// Only spawn and wait failures are errors; the exit status is returned.
    async fn run_command(&self) -> Result<ExitStatus> {
        info!(cmd = %self.cmd, root = ?self.root, "running build command");

        let mut cmd = shell_command(&self.cmd);
        cmd.current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning build command '{}'", self.cmd))?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(forward_lines(out, false)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(forward_lines(err, true)));

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for build command '{}'", self.cmd))?;

        // Drain the output before reporting so logs stay in order.
        for task in [stdout, stderr].into_iter().flatten() {
            let _ = task.await;
        }

        info!(
            exit_code = status.code().unwrap_or(-1),
            success = status.success(),
            "build command exited"
        );
        Ok(status)
    }

    /// Forget the fingerprint of a failed build so the next pass reruns the
    /// command even when the inputs end up back where they were.
    fn discard_failed_records(&self) {
        let mut state = lock(&self.records);
        state.pending = None;
        state.written = None;
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(line);
        c
    }
}

async fn forward_lines<R>(reader: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!("stderr: {}", line);
        } else {
            info!("stdout: {}", line);
        }
    }
}

impl BuildPipeline for CommandPipeline {
    type Output = CommandBuild;

    fn load_records(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let loaded = lock(&self.store).load()?;
            match loaded.as_ref() {
                Some(records) => info!(fingerprint = %records.fingerprint, "previous build records found"),
                None => info!("no previous build records"),
            }
            lock(&self.records).written = loaded;
            Ok(())
        })
    }

    fn compile<'a>(&'a self, inputs: &'a BuildInputs) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            for path in inputs.removed_files.iter() {
                self.cache.invalidate(path);
            }

            let (files, records) = self.fingerprint_inputs(inputs)?;
            let (contexts, missing) = self.dependency_dirs();

            let changed = {
                let mut state = lock(&self.records);
                let changed = state
                    .written
                    .as_ref()
                    .is_none_or(|w| w.fingerprint != records.fingerprint);
                state.pending = Some(records.clone());
                changed
            };

            debug!(
                files = files.len(),
                contexts = contexts.len(),
                missing = missing.len(),
                changed_inputs = inputs.changed_files.len(),
                removed_inputs = inputs.removed_files.len(),
                changed,
                "inputs fingerprinted"
            );
            if !changed {
                info!(fingerprint = %records.fingerprint, "inputs unchanged; skipping build command");
            }

            Ok(CommandBuild {
                records,
                changed,
                files,
                contexts,
                missing,
                rerun: AtomicBool::new(false),
                failed_exit: OnceLock::new(),
            })
        })
    }

    fn emit_assets<'a>(&'a self, output: &'a Self::Output) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let status = self.run_command().await?;
            if !status.success() {
                let code = status.code().unwrap_or(-1);
                warn!(exit_code = code, "build command failed; waiting for changes");
                let _ = output.failed_exit.set(code);
                self.discard_failed_records();
                return Ok(());
            }

            if self.converge {
                let (_, after) = self.fingerprint_inputs(&BuildInputs::default())?;
                if after.fingerprint != output.records.fingerprint {
                    info!("build command rewrote its inputs; requesting another pass");
                    output.rerun.store(true, Ordering::SeqCst);
                }
            }
            Ok(())
        })
    }

    fn write_records(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let pending = lock(&self.records).pending.take();
            let Some(records) = pending else {
                debug!("no pending records to write");
                return Ok(());
            };

            lock(&self.store).save(&records)?;
            lock(&self.records).written = Some(records);
            Ok(())
        })
    }
}
