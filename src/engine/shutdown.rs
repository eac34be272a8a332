// src/engine/shutdown.rs

//! Close handling.
//!
//! Closing is idempotent. If no cycle is in flight the teardown happens
//! right away; otherwise the running cycle is invalidated and the teardown
//! replaces whatever its completion step would have done.

use tracing::{debug, info};

use crate::engine::core::{SessionState, WatcherSlot};
use crate::engine::event_handlers::CoreStep;
use crate::engine::{SessionCommand, SessionPhase};
use crate::types::BuildInputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownState {
    NotRequested,
    /// Waiting for the in-flight cycle to reach a completion point.
    Deferred,
    Done,
}

pub fn handle_close_request<O>(state: &mut SessionState<O>) -> CoreStep<O> {
    if state.closed {
        debug!("close already requested");
        return CoreStep::idle();
    }

    state.closed = true;
    let mut commands = Vec::new();

    if state.watcher != WatcherSlot::None {
        state.watcher = WatcherSlot::None;
        commands.push(SessionCommand::CloseWatchers);
    }

    if state.running {
        info!(cycle = state.cycle, "close requested; waiting for the running cycle");
        state.invalid = true;
        state.teardown = TeardownState::Deferred;
        state.phase = SessionPhase::Closing;
        return CoreStep::continue_with(commands);
    }

    let mut step = teardown(state);
    commands.append(&mut step.commands);
    CoreStep {
        commands,
        keep_running: step.keep_running,
    }
}

/// Final teardown: clear build inputs and flags, then ask the shell to shut
/// the cache down and stop.
pub fn teardown<O>(state: &mut SessionState<O>) -> CoreStep<O> {
    info!("tearing down build session");
    state.inputs = BuildInputs::default();
    state.running = false;
    state.invalid = false;
    state.cache_active = false;
    state.output = None;
    state.finishing = None;
    state.teardown = TeardownState::Done;
    state.phase = SessionPhase::Closed;

    CoreStep {
        commands: vec![SessionCommand::Teardown],
        keep_running: false,
    }
}
