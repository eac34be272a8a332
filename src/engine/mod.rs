// src/engine/mod.rs

//! Build session engine.
//!
//! This module ties together:
//! - the pure session state machine ([`core::SessionCore`]), which decides
//!   when cycles start, restart, fail or finish, and when the watcher is
//!   armed, paused or closed
//! - the async shell ([`runtime::Session`]) that owns the collaborators,
//!   runs pipeline stages on spawned tasks and feeds their completions back
//!   into the core
//! - shutdown bookkeeping ([`shutdown`])
//!
//! The core is advanced one [`SessionEvent`] at a time and answers with
//! [`SessionCommand`]s for the shell to execute.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::WatchConfig;
use crate::errors::{Result, RewatchError};
use crate::types::{BuildInputs, BuildSnapshot, ChangeBatch, TimestampSnapshot};
use crate::watch::WatchId;

pub mod core;
pub mod event_handlers;
pub mod runtime;
pub mod shutdown;

pub use core::SessionCore;
pub use event_handlers::CoreStep;
pub use runtime::{Session, SessionHandle};

/// Options fixed for the lifetime of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub watch: WatchConfig,
    /// Maximum `compile` passes per cycle; unbounded when `None`.
    pub max_passes: Option<u32>,
}

/// Stage of an in-flight cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Compiling,
    Emitting,
    WritingRecords,
    /// Waiting on the "cycle advanced" hook before the next pass.
    Advancing,
    /// Waiting on the "cycle finished" hook before delivery.
    Finishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Loading persisted records.
    Starting,
    Building(BuildStage),
    /// Last cycle succeeded; waiting for changes.
    Watching,
    /// Last cycle (or the watcher) failed; waiting for an explicit
    /// invalidation.
    Failed,
    /// Close requested while a cycle was in flight.
    Closing,
    Closed,
}

/// Failed cycle as delivered to the report receiver.
pub struct BuildFailure<O> {
    pub error: RewatchError,
    /// Present when the pipeline had produced a result before failing.
    pub snapshot: Option<BuildSnapshot<O>>,
}

impl<O> fmt::Debug for BuildFailure<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildFailure")
            .field("error", &self.error)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// One report per delivered cycle.
pub type BuildReport<O> = std::result::Result<BuildSnapshot<O>, BuildFailure<O>>;

/// Dependency sets the watcher is armed with after a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPlan {
    pub id: WatchId,
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    pub start_time: SystemTime,
}

/// Inputs to the core state machine.
#[derive(Debug)]
pub enum SessionEvent<O> {
    RecordsLoaded(Result<()>),
    Compiled(Result<Arc<O>>),
    AssetsEmitted(Result<()>),
    RecordsWritten(Result<()>),
    /// The "cycle advanced" hook settled.
    PassAdvanced(Result<()>),
    /// The "cycle finished" hook settled.
    FinishNotified,
    /// External invalidation. `timestamps` holds the active watcher's
    /// `(file, context)` snapshots when one was active.
    InvalidateRequested {
        timestamps: Option<(TimestampSnapshot, TimestampSnapshot)>,
    },
    CloseRequested,
    WatchBatch {
        id: WatchId,
        result: Result<ChangeBatch>,
    },
    PathChanged {
        id: WatchId,
        path: PathBuf,
        at: SystemTime,
    },
}

impl<O> SessionEvent<O> {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::RecordsLoaded(_) => "records_loaded",
            SessionEvent::Compiled(_) => "compiled",
            SessionEvent::AssetsEmitted(_) => "assets_emitted",
            SessionEvent::RecordsWritten(_) => "records_written",
            SessionEvent::PassAdvanced(_) => "pass_advanced",
            SessionEvent::FinishNotified => "finish_notified",
            SessionEvent::InvalidateRequested { .. } => "invalidate_requested",
            SessionEvent::CloseRequested => "close_requested",
            SessionEvent::WatchBatch { .. } => "watch_batch",
            SessionEvent::PathChanged { .. } => "path_changed",
        }
    }
}

/// Work the core asks the shell to perform.
#[derive(Debug)]
pub enum SessionCommand<O> {
    LoadRecords,
    /// Start a cycle: bring the cache out of idle if needed, announce the
    /// cycle, then compile.
    BeginCycle {
        inputs: BuildInputs,
        enter_active: bool,
    },
    /// Additional pass within the current cycle.
    Compile {
        inputs: BuildInputs,
    },
    EmitAssets(Arc<O>),
    WriteRecords,
    AdvancePass(BuildSnapshot<O>),
    NotifyFinished(BuildSnapshot<O>),
    /// Run the failed hook, optionally return the cache to idle, then
    /// deliver the failure. Performed in that order before the next event.
    FailCycle {
        failure: BuildFailure<O>,
        enter_idle: bool,
    },
    EnterIdle,
    Deliver(BuildReport<O>),
    ArmWatcher(WatchPlan),
    PauseWatcher,
    CloseWatchers,
    /// Notify every `invalidate_and_wait` caller queued so far.
    ReleaseWaiters,
    ForwardPathChange {
        path: PathBuf,
        at: SystemTime,
    },
    /// Final teardown; the session loop exits afterwards.
    Teardown,
}

impl<O> SessionCommand<O> {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::LoadRecords => "load_records",
            SessionCommand::BeginCycle { .. } => "begin_cycle",
            SessionCommand::Compile { .. } => "compile",
            SessionCommand::EmitAssets(_) => "emit_assets",
            SessionCommand::WriteRecords => "write_records",
            SessionCommand::AdvancePass(_) => "advance_pass",
            SessionCommand::NotifyFinished(_) => "notify_finished",
            SessionCommand::FailCycle { .. } => "fail_cycle",
            SessionCommand::EnterIdle => "enter_idle",
            SessionCommand::Deliver(_) => "deliver",
            SessionCommand::ArmWatcher(_) => "arm_watcher",
            SessionCommand::PauseWatcher => "pause_watcher",
            SessionCommand::CloseWatchers => "close_watchers",
            SessionCommand::ReleaseWaiters => "release_waiters",
            SessionCommand::ForwardPathChange { .. } => "forward_path_change",
            SessionCommand::Teardown => "teardown",
        }
    }
}
