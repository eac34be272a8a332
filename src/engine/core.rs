// src/engine/core.rs

//! Pure session state machine.
//!
//! [`SessionCore`] consumes [`SessionEvent`]s and produces:
//! - an updated session state
//! - a list of [`SessionCommand`]s describing what the IO shell should do
//!
//! The async shell (`engine::runtime::Session`) is responsible for:
//! - reading requests, watcher events and stage completions from channels
//! - running pipeline stages, cache transitions and hooks
//! - owning the watcher handle
//!
//! The core has no channels, no Tokio types, and performs no IO, so every
//! ordering rule of a build cycle can be unit tested step by step.

use std::sync::Arc;
use std::time::SystemTime;

use crate::engine::event_handlers::{
    handle_assets_emitted, handle_compiled, handle_finish_notified, handle_invalidate,
    handle_pass_advanced, handle_path_changed, handle_records_loaded, handle_records_written,
    handle_watch_batch, CoreStep,
};
use crate::engine::shutdown::{handle_close_request, TeardownState};
use crate::engine::{SessionCommand, SessionEvent, SessionOptions, SessionPhase};
use crate::pipeline::BuildOutput;
use crate::types::{BuildInputs, BuildSnapshot};
use crate::watch::WatchId;

/// Which watch registration, if any, the session holds.
///
/// A registration is either active or paused, never both; pausing moves
/// it from one slot to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherSlot {
    None,
    Active(WatchId),
    /// Paused but not closed; its timestamps stay queryable.
    Paused(WatchId),
}

/// Mutable session state shared by the event handlers.
#[derive(Debug)]
pub struct SessionState<O> {
    pub(crate) phase: SessionPhase,
    pub(crate) start_time: SystemTime,
    pub(crate) running: bool,
    pub(crate) invalid: bool,
    pub(crate) closed: bool,
    pub(crate) watcher: WatcherSlot,
    pub(crate) inputs: BuildInputs,
    /// Whether the result cache is currently out of idle mode.
    pub(crate) cache_active: bool,
    pub(crate) teardown: TeardownState,
    pub(crate) cycle: u64,
    pub(crate) pass: u32,
    pub(crate) max_passes: Option<u32>,
    /// Result of the latest pass of the current cycle.
    pub(crate) output: Option<Arc<O>>,
    /// Snapshot waiting on the "cycle finished" hook.
    pub(crate) finishing: Option<BuildSnapshot<O>>,
    next_watch_id: u64,
}

impl<O> SessionState<O> {
    fn new(options: &SessionOptions) -> Self {
        Self {
            phase: SessionPhase::Starting,
            start_time: SystemTime::UNIX_EPOCH,
            // Loading records counts as running, so invalidations during
            // startup coalesce into the first cycle.
            running: true,
            invalid: false,
            closed: false,
            watcher: WatcherSlot::None,
            inputs: BuildInputs::default(),
            cache_active: false,
            teardown: TeardownState::NotRequested,
            cycle: 0,
            pass: 0,
            max_passes: options.max_passes,
            output: None,
            finishing: None,
            next_watch_id: 0,
        }
    }

    pub(crate) fn next_watch_id(&mut self) -> WatchId {
        self.next_watch_id += 1;
        WatchId(self.next_watch_id)
    }

    /// Pause the active registration, if any.
    pub(crate) fn pause_watcher(&mut self, commands: &mut Vec<SessionCommand<O>>) {
        if let WatcherSlot::Active(id) = self.watcher {
            self.watcher = WatcherSlot::Paused(id);
            commands.push(SessionCommand::PauseWatcher);
        }
    }
}

/// Pure core of a build session.
#[derive(Debug)]
pub struct SessionCore<O> {
    state: SessionState<O>,
}

impl<O: BuildOutput> SessionCore<O> {
    pub fn new(options: &SessionOptions) -> Self {
        Self {
            state: SessionState::new(options),
        }
    }

    /// Commands that begin the startup sequence.
    pub fn start(&mut self) -> CoreStep<O> {
        CoreStep {
            commands: vec![SessionCommand::LoadRecords],
            keep_running: true,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn is_invalid(&self) -> bool {
        self.state.invalid
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    pub fn watcher(&self) -> WatcherSlot {
        self.state.watcher
    }

    pub fn watcher_is_active(&self) -> bool {
        matches!(self.state.watcher, WatcherSlot::Active(_))
    }

    pub fn inputs(&self) -> &BuildInputs {
        &self.state.inputs
    }

    pub fn cache_active(&self) -> bool {
        self.state.cache_active
    }

    /// Number of cycles started so far.
    pub fn cycle(&self) -> u64 {
        self.state.cycle
    }

    /// Pass number within the current cycle (1-based).
    pub fn pass(&self) -> u32 {
        self.state.pass
    }

    /// Handle a single event using the current wall-clock time.
    pub fn step(&mut self, event: SessionEvent<O>) -> CoreStep<O> {
        self.step_at(event, SystemTime::now())
    }

    /// Handle a single event at an explicit instant, updating the state and
    /// returning the commands for the IO shell.
    pub fn step_at(&mut self, event: SessionEvent<O>, now: SystemTime) -> CoreStep<O> {
        let state = &mut self.state;
        match event {
            SessionEvent::RecordsLoaded(result) => handle_records_loaded(state, result, now),
            SessionEvent::Compiled(result) => handle_compiled(state, result, now),
            SessionEvent::AssetsEmitted(result) => handle_assets_emitted(state, result, now),
            SessionEvent::RecordsWritten(result) => handle_records_written(state, result, now),
            SessionEvent::PassAdvanced(result) => handle_pass_advanced(state, result, now),
            SessionEvent::FinishNotified => handle_finish_notified(state, now),
            SessionEvent::InvalidateRequested { timestamps } => {
                handle_invalidate(state, timestamps, now)
            }
            SessionEvent::CloseRequested => handle_close_request(state),
            SessionEvent::WatchBatch { id, result } => handle_watch_batch(state, id, result, now),
            SessionEvent::PathChanged { id, path, at } => handle_path_changed(state, id, path, at),
        }
    }
}
