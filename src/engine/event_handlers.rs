// src/engine/event_handlers.rs

//! Event handling logic for the session core.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::engine::core::{SessionState, WatcherSlot};
use crate::engine::shutdown::{teardown, TeardownState};
use crate::engine::{
    BuildFailure, BuildStage, SessionCommand, SessionPhase, WatchPlan,
};
use crate::errors::{Result, RewatchError};
use crate::pipeline::BuildOutput;
use crate::types::{BuildInputs, BuildSnapshot, ChangeBatch, TimestampSnapshot};
use crate::watch::WatchId;

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep<O> {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<SessionCommand<O>>,
    /// Whether the session loop should keep running.
    pub keep_running: bool,
}

impl<O> CoreStep<O> {
    pub(crate) fn continue_with(commands: Vec<SessionCommand<O>>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    pub(crate) fn idle() -> Self {
        Self::continue_with(Vec::new())
    }
}

/// How a cycle reached its completion step.
enum CycleEnd {
    Failed(RewatchError),
    Completed,
}

/// Persisted records finished loading.
pub fn handle_records_loaded<O: BuildOutput>(
    state: &mut SessionState<O>,
    result: Result<()>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.teardown == TeardownState::Deferred {
        return teardown(state);
    }

    match result {
        Ok(()) => {
            if state.invalid {
                debug!("invalidated during startup; first cycle covers it");
            }
            start_cycle(state, now)
        }
        Err(error) => {
            warn!(error = %error, "failed to load build records");
            state.running = false;
            state.phase = SessionPhase::Failed;
            CoreStep::continue_with(vec![SessionCommand::FailCycle {
                failure: BuildFailure {
                    error,
                    snapshot: None,
                },
                enter_idle: false,
            }])
        }
    }
}

/// Enter a new cycle: reset the per-cycle flags and ask the shell to
/// activate the cache and compile.
pub fn start_cycle<O: BuildOutput>(state: &mut SessionState<O>, now: SystemTime) -> CoreStep<O> {
    let mut commands = Vec::new();

    state.start_time = now;
    state.running = true;
    state.invalid = false;
    state.cycle += 1;
    state.pass = 1;
    state.output = None;
    state.finishing = None;
    state.phase = SessionPhase::Building(BuildStage::Compiling);

    // A cycle never runs with a live watcher.
    state.pause_watcher(&mut commands);

    let enter_active = !state.cache_active;
    state.cache_active = true;

    info!(cycle = state.cycle, "starting build cycle");
    commands.push(SessionCommand::BeginCycle {
        inputs: state.inputs.clone(),
        enter_active,
    });

    CoreStep::continue_with(commands)
}

pub fn handle_compiled<O: BuildOutput>(
    state: &mut SessionState<O>,
    result: Result<Arc<O>>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.invalid {
        return supersede(state, now);
    }

    let output = match result {
        Ok(output) => output,
        Err(error) => return finish_cycle(state, CycleEnd::Failed(error), now),
    };
    state.output = Some(Arc::clone(&output));

    if !output.should_emit() {
        debug!(cycle = state.cycle, pass = state.pass, "pass completed without emit");
        return finish_cycle(state, CycleEnd::Completed, now);
    }

    state.phase = SessionPhase::Building(BuildStage::Emitting);
    CoreStep::continue_with(vec![SessionCommand::EmitAssets(output)])
}

pub fn handle_assets_emitted<O: BuildOutput>(
    state: &mut SessionState<O>,
    result: Result<()>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.invalid {
        return supersede(state, now);
    }
    if let Err(error) = result {
        return finish_cycle(state, CycleEnd::Failed(error), now);
    }

    state.phase = SessionPhase::Building(BuildStage::WritingRecords);
    CoreStep::continue_with(vec![SessionCommand::WriteRecords])
}

pub fn handle_records_written<O: BuildOutput>(
    state: &mut SessionState<O>,
    result: Result<()>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.invalid {
        return supersede(state, now);
    }
    if let Err(error) = result {
        return finish_cycle(state, CycleEnd::Failed(error), now);
    }

    let needs_pass = state
        .output
        .as_ref()
        .is_some_and(|output| output.needs_additional_pass());
    if !needs_pass {
        return finish_cycle(state, CycleEnd::Completed, now);
    }

    if let Some(max) = state.max_passes {
        if state.pass >= max {
            warn!(cycle = state.cycle, passes = state.pass, "pass limit reached");
            return finish_cycle(state, CycleEnd::Failed(RewatchError::PassLimitExceeded(max)), now);
        }
    }

    debug!(cycle = state.cycle, pass = state.pass, "additional pass requested");
    state.phase = SessionPhase::Building(BuildStage::Advancing);
    let interim = BuildSnapshot::new(state.start_time, now, state.output.clone());
    CoreStep::continue_with(vec![SessionCommand::AdvancePass(interim)])
}

/// The "cycle advanced" hook settled; run the next pass.
pub fn handle_pass_advanced<O: BuildOutput>(
    state: &mut SessionState<O>,
    result: Result<()>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.invalid {
        return supersede(state, now);
    }
    if let Err(error) = result {
        return finish_cycle(state, CycleEnd::Failed(error), now);
    }

    state.pass += 1;
    state.phase = SessionPhase::Building(BuildStage::Compiling);
    debug!(cycle = state.cycle, pass = state.pass, "starting additional pass");
    CoreStep::continue_with(vec![SessionCommand::Compile {
        inputs: state.inputs.clone(),
    }])
}

/// `invalid` was observed at a stage checkpoint: discard the stage's result
/// or error and restart, unless teardown is pending.
fn supersede<O: BuildOutput>(state: &mut SessionState<O>, now: SystemTime) -> CoreStep<O> {
    if state.teardown == TeardownState::Deferred {
        return teardown(state);
    }
    debug!(cycle = state.cycle, "cycle superseded; restarting");
    start_cycle(state, now)
}

/// Cycle completion. Pending teardown wins over the result.
fn finish_cycle<O: BuildOutput>(
    state: &mut SessionState<O>,
    end: CycleEnd,
    now: SystemTime,
) -> CoreStep<O> {
    if state.teardown == TeardownState::Deferred {
        return teardown(state);
    }

    let output = state.output.take();
    match end {
        CycleEnd::Failed(error) => {
            warn!(cycle = state.cycle, error = %error, "build cycle failed");
            state.running = false;
            state.cache_active = false;
            state.phase = SessionPhase::Failed;
            let snapshot = output.map(|o| BuildSnapshot::new(state.start_time, now, Some(o)));
            CoreStep::continue_with(vec![SessionCommand::FailCycle {
                failure: BuildFailure { error, snapshot },
                enter_idle: true,
            }])
        }
        CycleEnd::Completed => {
            let snapshot = BuildSnapshot::new(state.start_time, now, output);
            state.phase = SessionPhase::Building(BuildStage::Finishing);
            state.finishing = Some(snapshot.clone());
            // `running` stays set until delivery, so an invalidation during
            // the finished hook restarts instead of delivering stale output.
            CoreStep::continue_with(vec![SessionCommand::NotifyFinished(snapshot)])
        }
    }
}

/// The "cycle finished" hook settled: deliver, re-arm and release waiters.
pub fn handle_finish_notified<O: BuildOutput>(
    state: &mut SessionState<O>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.teardown == TeardownState::Deferred {
        return teardown(state);
    }
    if state.invalid {
        debug!(cycle = state.cycle, "invalidated while finishing; restarting");
        return start_cycle(state, now);
    }

    let Some(snapshot) = state.finishing.take() else {
        return CoreStep::idle();
    };

    state.running = false;
    state.cache_active = false;
    state.phase = SessionPhase::Watching;

    let mut commands = vec![SessionCommand::EnterIdle];
    let plan = if state.closed {
        None
    } else {
        snapshot.build.as_ref().map(|build| {
            (
                build.file_dependencies().to_vec(),
                build.context_dependencies().to_vec(),
                build.missing_dependencies().to_vec(),
            )
        })
    };
    commands.push(SessionCommand::Deliver(Ok(snapshot)));

    if let Some((files, dirs, missing)) = plan {
        let id = state.next_watch_id();
        state.watcher = WatcherSlot::Active(id);
        info!(
            cycle = state.cycle,
            watch_id = %id,
            files = files.len(),
            dirs = dirs.len(),
            missing = missing.len(),
            "re-arming watcher"
        );
        commands.push(SessionCommand::ArmWatcher(WatchPlan {
            id,
            files,
            dirs,
            missing,
            start_time: state.start_time,
        }));
    }

    commands.push(SessionCommand::ReleaseWaiters);
    CoreStep::continue_with(commands)
}

/// External invalidation request.
pub fn handle_invalidate<O: BuildOutput>(
    state: &mut SessionState<O>,
    timestamps: Option<(TimestampSnapshot, TimestampSnapshot)>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.closed {
        debug!("invalidate after close ignored");
        return CoreStep::idle();
    }

    if matches!(state.watcher, WatcherSlot::Active(_)) {
        if let Some((files, contexts)) = timestamps {
            state.inputs.file_timestamps = files;
            state.inputs.context_timestamps = contexts;
        }
    }

    invalidate_step(state, now)
}

/// Shared invalidation step: pause the watcher, then either mark the
/// running cycle invalid or start a new one.
pub fn invalidate_step<O: BuildOutput>(
    state: &mut SessionState<O>,
    now: SystemTime,
) -> CoreStep<O> {
    let mut commands = Vec::new();
    state.pause_watcher(&mut commands);

    if state.running {
        if !state.invalid {
            debug!(cycle = state.cycle, "current cycle invalidated");
        }
        state.invalid = true;
        return CoreStep::continue_with(commands);
    }

    let mut step = start_cycle(state, now);
    commands.append(&mut step.commands);
    CoreStep::continue_with(commands)
}

/// A watcher reported a settled batch (or failed).
pub fn handle_watch_batch<O: BuildOutput>(
    state: &mut SessionState<O>,
    id: WatchId,
    result: Result<ChangeBatch>,
    now: SystemTime,
) -> CoreStep<O> {
    if state.watcher != WatcherSlot::Active(id) {
        debug!(watch_id = %id, "ignoring batch from stale watcher");
        return CoreStep::idle();
    }

    // The watcher paused itself before reporting.
    state.watcher = WatcherSlot::Paused(id);
    let mut commands = vec![SessionCommand::PauseWatcher];

    match result {
        Err(error) => {
            warn!(watch_id = %id, error = %error, "watcher failed");
            state.phase = SessionPhase::Failed;
            commands.push(SessionCommand::Deliver(Err(BuildFailure {
                error,
                snapshot: None,
            })));
            CoreStep::continue_with(commands)
        }
        Ok(batch) => {
            info!(
                watch_id = %id,
                changed = batch.changed_files.len(),
                removed = batch.removed_files.len(),
                "changes detected"
            );
            state.inputs = BuildInputs {
                file_timestamps: batch.file_timestamps,
                context_timestamps: batch.context_timestamps,
                removed_files: batch.removed_files,
                changed_files: batch.changed_files,
            };
            let mut step = invalidate_step(state, now);
            commands.append(&mut step.commands);
            CoreStep::continue_with(commands)
        }
    }
}

/// A single watched path changed; forwarded to the hooks only.
pub fn handle_path_changed<O: BuildOutput>(
    state: &mut SessionState<O>,
    id: WatchId,
    path: PathBuf,
    at: SystemTime,
) -> CoreStep<O> {
    if state.watcher != WatcherSlot::Active(id) {
        return CoreStep::idle();
    }
    CoreStep::continue_with(vec![SessionCommand::ForwardPathChange { path, at }])
}
