// src/pipeline/mod.rs

//! Collaborators the session driver consumes.
//!
//! The driver talks to trait objects instead of concrete types so tests can
//! swap in scripted fakes while production wires up:
//!
//! - [`command::CommandPipeline`]: hashes inputs and runs a shell command.
//! - [`cache::HashCache`]: content-hash cache with idle/active modes.
//! - [`records`]: persisted fingerprint of the last emitted build.
//! - [`hooks::TracingHooks`]: logs every lifecycle event.
//!
//! All async methods return boxed futures (same shape as an executor
//! backend) so the traits stay object safe and the futures can be moved
//! onto spawned tasks.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use crate::errors::{Result, RewatchError};
use crate::types::{BuildInputs, BuildSnapshot};
use crate::watch::WatchFileSystem;

pub mod cache;
pub mod command;
pub mod hooks;
pub mod records;

pub use cache::HashCache;
pub use command::{CommandBuild, CommandPipeline};
pub use hooks::{NoopHooks, TracingHooks};
pub use records::{BuildRecords, FileRecordStore, MemoryRecordStore, RecordStore};

/// Boxed, sendable future used by every collaborator trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result object produced by one `compile` pass.
pub trait BuildOutput: Send + Sync + 'static {
    /// `false` means "completed but do not publish": emission and record
    /// writing are skipped for this pass.
    fn should_emit(&self) -> bool {
        true
    }

    /// The pass discovered something that needs another full pass.
    fn needs_additional_pass(&self) -> bool {
        false
    }

    fn file_dependencies(&self) -> &[PathBuf];
    fn context_dependencies(&self) -> &[PathBuf];
    fn missing_dependencies(&self) -> &[PathBuf];
}

/// The multi-stage build pipeline.
pub trait BuildPipeline: Send + Sync + 'static {
    type Output: BuildOutput;

    /// Load persisted records. Called once, before the first cycle.
    fn load_records(&self) -> BoxFuture<'_, Result<()>>;

    /// Run one pass. May be called several times per cycle.
    fn compile<'a>(&'a self, inputs: &'a BuildInputs) -> BoxFuture<'a, Result<Self::Output>>;

    fn emit_assets<'a>(&'a self, output: &'a Self::Output) -> BoxFuture<'a, Result<()>>;

    fn write_records(&self) -> BoxFuture<'_, Result<()>>;
}

/// Build-result cache with two lifecycle modes.
pub trait ResultCache: Send + Sync + 'static {
    fn enter_active(&self) -> BoxFuture<'_, Result<()>>;
    fn enter_idle(&self) -> BoxFuture<'_, ()>;
    fn shutdown(&self) -> BoxFuture<'_, Result<()>>;
}

/// Observability hooks. Every method defaults to a no-op.
pub trait LifecycleHooks<O>: Send + Sync + 'static
where
    O: Send + Sync + 'static,
{
    fn cycle_started(&self) {}

    /// A single watched path changed; fires before the batch settles.
    fn path_invalidated(&self, _path: &Path, _at: SystemTime) {}

    /// Interim result of a pass that requested another pass. An error
    /// fails the cycle.
    fn cycle_advanced<'a>(&'a self, _interim: &'a BuildSnapshot<O>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn cycle_finished<'a>(&'a self, _snapshot: &'a BuildSnapshot<O>) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    fn cycle_failed(&self, _error: &RewatchError) {}

    fn watch_closed(&self) {}
}

/// Everything a session needs from the outside world.
pub struct BuildContext<P: BuildPipeline> {
    pub pipeline: Arc<P>,
    pub cache: Arc<dyn ResultCache>,
    pub watch_fs: Arc<dyn WatchFileSystem>,
    pub hooks: Arc<dyn LifecycleHooks<P::Output>>,
}

impl<P: BuildPipeline> BuildContext<P> {
    /// Context with [`NoopHooks`].
    pub fn new(
        pipeline: Arc<P>,
        cache: Arc<dyn ResultCache>,
        watch_fs: Arc<dyn WatchFileSystem>,
    ) -> Self {
        Self {
            pipeline,
            cache,
            watch_fs,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks<P::Output>>) -> Self {
        self.hooks = hooks;
        self
    }
}

impl<P: BuildPipeline> Clone for BuildContext<P> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            cache: Arc::clone(&self.cache),
            watch_fs: Arc::clone(&self.watch_fs),
            hooks: Arc::clone(&self.hooks),
        }
    }
}
