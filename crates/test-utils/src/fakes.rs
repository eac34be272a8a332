#![allow(dead_code)]

//! Scripted collaborators for driving a build session in tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{watch, Semaphore};

use rewatch::errors::{Result, RewatchError};
use rewatch::pipeline::{
    BoxFuture, BuildContext, BuildOutput, BuildPipeline, LifecycleHooks, ResultCache,
};
use rewatch::types::{BuildInputs, BuildSnapshot, ChangeBatch, TimestampSnapshot};
use rewatch::watch::{WatchFileSystem, WatchRequest, WatchSink, WatcherHandle};

/// A gate tasks can wait on until the test releases them.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
    opened: Arc<AtomicBool>,
}

impl Gate {
    /// A gate that blocks until released.
    pub fn closed() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Let `n` waiters through.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Let every current and future waiter through.
    pub fn open(&self) {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.permits.add_permits(1 << 20);
        }
    }

    pub async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Monotonic counter tests can await.
#[derive(Debug, Clone)]
pub struct Counter {
    tx: Arc<watch::Sender<usize>>,
}

impl Default for Counter {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }
}

impl Counter {
    pub fn bump(&self) -> usize {
        let mut value = 0;
        self.tx.send_modify(|n| {
            *n += 1;
            value = *n;
        });
        value
    }

    pub fn get(&self) -> usize {
        *self.tx.borrow()
    }

    /// Wait until the counter reaches `n`.
    pub async fn wait_for(&self, n: usize) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|v| *v >= n).await;
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Result object produced by [`ScriptedPipeline`].
#[derive(Debug)]
pub struct FakeOutput {
    /// 1-based number of the `compile` call that produced this output.
    pub compile_no: usize,
    pub should_emit: bool,
    pub additional_pass: bool,
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

impl BuildOutput for FakeOutput {
    fn should_emit(&self) -> bool {
        self.should_emit
    }

    fn needs_additional_pass(&self) -> bool {
        self.additional_pass
    }

    fn file_dependencies(&self) -> &[PathBuf] {
        &self.files
    }

    fn context_dependencies(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn missing_dependencies(&self) -> &[PathBuf] {
        &self.missing
    }
}

/// Behaviour of one `compile` pass. Unscripted passes use the default:
/// compile, emit and write records successfully, no additional pass.
#[derive(Debug, Clone, Default)]
pub struct PassScript {
    pub fail_compile: bool,
    pub skip_emit: bool,
    pub fail_emit: bool,
    pub fail_records: bool,
    pub additional_pass: bool,
}

impl PassScript {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn compile_error() -> Self {
        Self {
            fail_compile: true,
            ..Self::default()
        }
    }

    pub fn emit_error() -> Self {
        Self {
            fail_emit: true,
            ..Self::default()
        }
    }

    pub fn records_error() -> Self {
        Self {
            fail_records: true,
            ..Self::default()
        }
    }

    pub fn no_emit() -> Self {
        Self {
            skip_emit: true,
            ..Self::default()
        }
    }

    pub fn needs_another_pass() -> Self {
        Self {
            additional_pass: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct PipelineInner {
    script: VecDeque<PassScript>,
    /// Script of the pass whose emit/write is in progress.
    current: PassScript,
    compile_inputs: Vec<BuildInputs>,
    in_flight: usize,
    max_in_flight: usize,
    emit_calls: usize,
    write_calls: usize,
}

/// [`BuildPipeline`] whose passes follow a script.
///
/// Records every `compile` input and tracks how many `compile` calls are in
/// flight at once.
#[derive(Debug)]
pub struct ScriptedPipeline {
    inner: Mutex<PipelineInner>,
    load_error: Mutex<Option<String>>,
    load_gate: Mutex<Option<Gate>>,
    compile_gate: Mutex<Option<Gate>>,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    missing: Vec<PathBuf>,
    pub loads: Counter,
    pub compiles_started: Counter,
    pub compiles_finished: Counter,
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PipelineInner::default()),
            load_error: Mutex::new(None),
            load_gate: Mutex::new(None),
            compile_gate: Mutex::new(None),
            files: vec![PathBuf::from("/project/src/main.rs")],
            dirs: vec![PathBuf::from("/project/src")],
            missing: vec![PathBuf::from("/project/build.config")],
            loads: Counter::default(),
            compiles_started: Counter::default(),
            compiles_finished: Counter::default(),
        }
    }

    /// Dependency sets reported by every output.
    pub fn with_dependencies(mut self, files: &[&str], dirs: &[&str], missing: &[&str]) -> Self {
        self.files = files.iter().map(PathBuf::from).collect();
        self.dirs = dirs.iter().map(PathBuf::from).collect();
        self.missing = missing.iter().map(PathBuf::from).collect();
        self
    }

    pub fn with_passes(self, passes: impl IntoIterator<Item = PassScript>) -> Self {
        self.inner.lock().unwrap().script.extend(passes);
        self
    }

    pub fn push_pass(&self, pass: PassScript) {
        self.inner.lock().unwrap().script.push_back(pass);
    }

    pub fn fail_load(self, msg: &str) -> Self {
        *self.load_error.lock().unwrap() = Some(msg.to_string());
        self
    }

    /// `load_records` waits on the gate.
    pub fn gate_load(self, gate: Gate) -> Self {
        *self.load_gate.lock().unwrap() = Some(gate);
        self
    }

    /// Every `compile` waits on the gate after it has started.
    pub fn gate_compile(self, gate: Gate) -> Self {
        *self.compile_gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn dependency_files(&self) -> Vec<PathBuf> {
        self.files.clone()
    }

    pub fn dependency_dirs(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }

    pub fn dependency_missing(&self) -> Vec<PathBuf> {
        self.missing.clone()
    }

    pub fn compile_calls(&self) -> usize {
        self.inner.lock().unwrap().compile_inputs.len()
    }

    pub fn compile_inputs(&self) -> Vec<BuildInputs> {
        self.inner.lock().unwrap().compile_inputs.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_in_flight
    }

    pub fn emit_calls(&self) -> usize {
        self.inner.lock().unwrap().emit_calls
    }

    pub fn write_calls(&self) -> usize {
        self.inner.lock().unwrap().write_calls
    }
}

impl BuildPipeline for ScriptedPipeline {
    type Output = FakeOutput;

    fn load_records(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let gate = self.load_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.loads.bump();
            match self.load_error.lock().unwrap().clone() {
                Some(msg) => Err(RewatchError::Other(anyhow::anyhow!(msg))),
                None => Ok(()),
            }
        })
    }

    fn compile<'a>(&'a self, inputs: &'a BuildInputs) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let (compile_no, pass) = {
                let mut inner = self.inner.lock().unwrap();
                inner.compile_inputs.push(inputs.clone());
                inner.in_flight += 1;
                inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
                let pass = inner.script.pop_front().unwrap_or_default();
                inner.current = pass.clone();
                (inner.compile_inputs.len(), pass)
            };
            self.compiles_started.bump();

            let gate = self.compile_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.pass().await;
            }

            self.inner.lock().unwrap().in_flight -= 1;
            self.compiles_finished.bump();

            if pass.fail_compile {
                return Err(RewatchError::Other(anyhow::anyhow!(
                    "compile {compile_no} failed"
                )));
            }

            Ok(FakeOutput {
                compile_no,
                should_emit: !pass.skip_emit,
                additional_pass: pass.additional_pass,
                files: self.files.clone(),
                dirs: self.dirs.clone(),
                missing: self.missing.clone(),
            })
        })
    }

    fn emit_assets<'a>(&'a self, output: &'a Self::Output) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.emit_calls += 1;
            if inner.current.fail_emit {
                return Err(RewatchError::CommandFailed(output.compile_no as i32));
            }
            Ok(())
        })
    }

    fn write_records(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.write_calls += 1;
            if inner.current.fail_records {
                return Err(RewatchError::Other(anyhow::anyhow!("records unwritable")));
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCall {
    EnterActive,
    EnterIdle,
    Shutdown,
}

/// [`ResultCache`] that records every transition.
#[derive(Debug, Default)]
pub struct RecordingCache {
    calls: Mutex<Vec<CacheCall>>,
    fail_shutdown: AtomicBool,
    fail_activate: AtomicBool,
    pub idles: Counter,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_shutdown() -> Self {
        let cache = Self::default();
        cache.fail_shutdown.store(true, Ordering::SeqCst);
        cache
    }

    pub fn failing_activate() -> Self {
        let cache = Self::default();
        cache.fail_activate.store(true, Ordering::SeqCst);
        cache
    }

    pub fn calls(&self) -> Vec<CacheCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: CacheCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }
}

impl ResultCache for RecordingCache {
    fn enter_active(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(CacheCall::EnterActive);
            if self.fail_activate.load(Ordering::SeqCst) {
                return Err(RewatchError::CacheShutdown("cache unavailable".into()));
            }
            Ok(())
        })
    }

    fn enter_idle(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(CacheCall::EnterIdle);
            self.idles.bump();
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(CacheCall::Shutdown);
            if self.fail_shutdown.load(Ordering::SeqCst) {
                return Err(RewatchError::CacheShutdown("disk full".into()));
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HandleState {
    paused: bool,
    closed: bool,
    files: TimestampSnapshot,
    contexts: TimestampSnapshot,
}

struct FakeHandle {
    state: Arc<Mutex<HandleState>>,
}

impl WatcherHandle for FakeHandle {
    fn pause(&mut self) {
        self.state.lock().unwrap().paused = true;
    }

    fn close(self: Box<Self>) {
        self.state.lock().unwrap().closed = true;
    }

    fn file_timestamps(&self) -> TimestampSnapshot {
        self.state.lock().unwrap().files.clone()
    }

    fn context_timestamps(&self) -> TimestampSnapshot {
        self.state.lock().unwrap().contexts.clone()
    }
}

struct Registration {
    request: WatchRequest,
    sink: WatchSink,
    state: Arc<Mutex<HandleState>>,
}

/// [`WatchFileSystem`] whose registrations are driven by the test.
///
/// Registrations are numbered from 0 in the order the session created them.
#[derive(Default)]
pub struct FakeWatchFileSystem {
    registrations: Mutex<Vec<Registration>>,
    fail_next: AtomicBool,
    pub armed: Counter,
}

impl FakeWatchFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `watch` call fails.
    pub fn fail_next_watch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn watch_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> WatchRequest {
        self.registrations.lock().unwrap()[index].request.clone()
    }

    pub fn is_paused(&self, index: usize) -> bool {
        self.registrations.lock().unwrap()[index].state.lock().unwrap().paused
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.registrations.lock().unwrap()[index].state.lock().unwrap().closed
    }

    /// Timestamps the handle reports when queried.
    pub fn set_timestamps(&self, index: usize, files: TimestampSnapshot, contexts: TimestampSnapshot) {
        let regs = self.registrations.lock().unwrap();
        let mut state = regs[index].state.lock().unwrap();
        state.files = files;
        state.contexts = contexts;
    }

    /// Report a settled batch; the registration pauses itself first, as a
    /// real watcher does.
    pub fn emit_batch(&self, index: usize, batch: ChangeBatch) -> bool {
        let regs = self.registrations.lock().unwrap();
        regs[index].state.lock().unwrap().paused = true;
        regs[index].sink.batch(Ok(batch))
    }

    pub fn emit_error(&self, index: usize, msg: &str) -> bool {
        let regs = self.registrations.lock().unwrap();
        regs[index].state.lock().unwrap().paused = true;
        regs[index]
            .sink
            .batch(Err(RewatchError::WatchError(msg.to_string())))
    }

    pub fn emit_path_changed(&self, index: usize, path: &str, at: SystemTime) -> bool {
        let regs = self.registrations.lock().unwrap();
        regs[index].sink.path_changed(PathBuf::from(path), at)
    }
}

impl WatchFileSystem for FakeWatchFileSystem {
    fn watch(&self, request: WatchRequest, sink: WatchSink) -> Result<Box<dyn WatcherHandle>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RewatchError::WatchError("registration refused".into()));
        }
        let state = Arc::new(Mutex::new(HandleState::default()));
        self.registrations.lock().unwrap().push(Registration {
            request,
            sink,
            state: Arc::clone(&state),
        });
        self.armed.bump();
        Ok(Box::new(FakeHandle { state }))
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    Started,
    PathInvalidated(PathBuf),
    Advanced,
    Finished,
    Failed(String),
    WatchClosed,
}

/// [`LifecycleHooks`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
    fail_advanced: AtomicBool,
    finish_gate: Mutex<Option<Gate>>,
    pub finishing: Counter,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_advanced() -> Self {
        let hooks = Self::default();
        hooks.fail_advanced.store(true, Ordering::SeqCst);
        hooks
    }

    /// `cycle_finished` waits on the gate.
    pub fn gate_finished(self, gate: Gate) -> Self {
        *self.finish_gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &HookCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

impl<O: Send + Sync + 'static> LifecycleHooks<O> for RecordingHooks {
    fn cycle_started(&self) {
        self.calls.lock().unwrap().push(HookCall::Started);
    }

    fn path_invalidated(&self, path: &Path, _at: SystemTime) {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::PathInvalidated(path.to_path_buf()));
    }

    fn cycle_advanced<'a>(&'a self, _interim: &'a BuildSnapshot<O>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(HookCall::Advanced);
            if self.fail_advanced.load(Ordering::SeqCst) {
                return Err(RewatchError::Other(anyhow::anyhow!("advance rejected")));
            }
            Ok(())
        })
    }

    fn cycle_finished<'a>(&'a self, _snapshot: &'a BuildSnapshot<O>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.finishing.bump();
            let gate = self.finish_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.pass().await;
            }
            self.calls.lock().unwrap().push(HookCall::Finished);
        })
    }

    fn cycle_failed(&self, error: &RewatchError) {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::Failed(error.to_string()));
    }

    fn watch_closed(&self) {
        self.calls.lock().unwrap().push(HookCall::WatchClosed);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Every fake wired into a [`BuildContext`], with handles kept for asserts.
pub struct FakeSession {
    pub pipeline: Arc<ScriptedPipeline>,
    pub cache: Arc<RecordingCache>,
    pub watch_fs: Arc<FakeWatchFileSystem>,
    pub hooks: Arc<RecordingHooks>,
}

impl FakeSession {
    pub fn new(pipeline: ScriptedPipeline) -> Self {
        Self::with_parts(pipeline, RecordingCache::new(), RecordingHooks::new())
    }

    pub fn with_parts(
        pipeline: ScriptedPipeline,
        cache: RecordingCache,
        hooks: RecordingHooks,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            cache: Arc::new(cache),
            watch_fs: Arc::new(FakeWatchFileSystem::new()),
            hooks: Arc::new(hooks),
        }
    }

    pub fn context(&self) -> BuildContext<ScriptedPipeline> {
        BuildContext::new(
            Arc::clone(&self.pipeline),
            self.cache.clone(),
            self.watch_fs.clone(),
        )
        .with_hooks(self.hooks.clone())
    }
}
