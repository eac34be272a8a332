// tests/session_properties.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use rewatch::engine::core::WatcherSlot;
use rewatch::engine::{SessionCommand, SessionCore, SessionEvent, SessionOptions};
use rewatch::errors::RewatchError;
use rewatch::types::ChangeBatch;
use rewatch_test_utils::fakes::FakeOutput;

#[derive(Debug, Clone, Copy)]
enum Action {
    CompleteOk,
    CompleteErr,
    CompleteNoEmit,
    CompleteNeedsPass,
    Invalidate,
    Batch,
    Close,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => Just(Action::CompleteOk),
        1 => Just(Action::CompleteErr),
        1 => Just(Action::CompleteNoEmit),
        1 => Just(Action::CompleteNeedsPass),
        3 => Just(Action::Invalidate),
        2 => Just(Action::Batch),
        1 => Just(Action::Close),
    ]
}

fn output(should_emit: bool, additional_pass: bool) -> Arc<FakeOutput> {
    Arc::new(FakeOutput {
        compile_no: 0,
        should_emit,
        additional_pass,
        files: vec![PathBuf::from("/p/a")],
        dirs: vec![],
        missing: vec![],
    })
}

fn err() -> RewatchError {
    RewatchError::CommandFailed(1)
}

/// Completion event for the stage currently in flight.
fn completion(stage: &'static str, action: Action) -> SessionEvent<FakeOutput> {
    let failed = matches!(action, Action::CompleteErr);
    let result = if failed { Err(err()) } else { Ok(()) };
    match stage {
        "load_records" => SessionEvent::RecordsLoaded(result),
        "begin_cycle" | "compile" => SessionEvent::Compiled(match action {
            Action::CompleteErr => Err(err()),
            Action::CompleteNoEmit => Ok(output(false, false)),
            Action::CompleteNeedsPass => Ok(output(true, true)),
            _ => Ok(output(true, false)),
        }),
        "emit_assets" => SessionEvent::AssetsEmitted(result),
        "write_records" => SessionEvent::RecordsWritten(result),
        "advance_pass" => SessionEvent::PassAdvanced(result),
        "notify_finished" => SessionEvent::FinishNotified,
        other => unreachable!("not a stage: {other}"),
    }
}

fn is_stage(command: &SessionCommand<FakeOutput>) -> bool {
    matches!(
        command,
        SessionCommand::LoadRecords
            | SessionCommand::BeginCycle { .. }
            | SessionCommand::Compile { .. }
            | SessionCommand::EmitAssets(_)
            | SessionCommand::WriteRecords
            | SessionCommand::AdvancePass(_)
            | SessionCommand::NotifyFinished(_)
    )
}

/// Drives the core like the async shell would, checking the ordering
/// invariants after every event.
fn simulate(actions: &[Action], max_passes: Option<u32>) -> Result<(), TestCaseError> {
    let mut core: SessionCore<FakeOutput> = SessionCore::new(&SessionOptions {
        max_passes,
        ..SessionOptions::default()
    });
    let mut now = SystemTime::UNIX_EPOCH;
    let mut in_flight: Option<&'static str> = None;
    let mut cache_active = false;
    let mut closed = false;
    let mut finished = false;

    let mut pending = core.start().commands;

    for action in actions.iter().copied() {
        for command in pending.drain(..) {
            if is_stage(&command) {
                prop_assert!(in_flight.is_none(), "two stages in flight");
                in_flight = Some(command.name());
            }
            match &command {
                SessionCommand::BeginCycle { enter_active, .. } => {
                    prop_assert_eq!(*enter_active, !cache_active);
                    cache_active = true;
                }
                SessionCommand::EnterIdle => {
                    prop_assert!(cache_active);
                    cache_active = false;
                }
                SessionCommand::FailCycle { enter_idle: true, .. } => {
                    prop_assert!(cache_active);
                    cache_active = false;
                }
                SessionCommand::ArmWatcher(_) => {
                    prop_assert!(!closed, "re-armed after close");
                }
                _ => {}
            }
        }

        prop_assert!(
            !(core.is_running() && core.watcher_is_active()),
            "running with an active watcher"
        );

        if finished {
            break;
        }

        now += Duration::from_millis(10);
        let event = match action {
            Action::CompleteOk
            | Action::CompleteErr
            | Action::CompleteNoEmit
            | Action::CompleteNeedsPass => match in_flight.take() {
                Some(stage) => completion(stage, action),
                None => continue,
            },
            Action::Invalidate => SessionEvent::InvalidateRequested { timestamps: None },
            Action::Batch => match core.watcher() {
                WatcherSlot::Active(id) => SessionEvent::WatchBatch {
                    id,
                    result: Ok(ChangeBatch::default()),
                },
                _ => continue,
            },
            Action::Close => {
                closed = true;
                SessionEvent::CloseRequested
            }
        };

        let step = core.step_at(event, now);
        if !step.keep_running {
            prop_assert!(step
                .commands
                .iter()
                .any(|c| matches!(c, SessionCommand::Teardown)));
            finished = true;
        }
        pending = step.commands;
    }

    Ok(())
}

proptest! {
    #[test]
    fn ordering_invariants_hold_for_any_event_sequence(
        actions in proptest::collection::vec(action_strategy(), 1..80),
        max_passes in proptest::option::of(1u32..4),
    ) {
        simulate(&actions, max_passes)?;
    }

    #[test]
    fn invalidations_during_a_cycle_coalesce_into_one_restart(n in 1usize..20) {
        let mut core: SessionCore<FakeOutput> = SessionCore::new(&SessionOptions::default());
        core.start();
        core.step(SessionEvent::RecordsLoaded(Ok(())));

        for _ in 0..n {
            let step = core.step(SessionEvent::InvalidateRequested { timestamps: None });
            prop_assert!(step.commands.is_empty());
        }

        let step = core.step(SessionEvent::Compiled(Ok(output(true, false))));
        let begins = step
            .commands
            .iter()
            .filter(|c| matches!(c, SessionCommand::BeginCycle { .. }))
            .count();
        prop_assert_eq!(begins, 1);
        prop_assert_eq!(core.cycle(), 2);
    }

    #[test]
    fn passes_converge_after_requested_count(extra in 0u32..6) {
        let mut core: SessionCore<FakeOutput> = SessionCore::new(&SessionOptions::default());
        core.start();
        core.step(SessionEvent::RecordsLoaded(Ok(())));

        let mut compiles = 1;
        loop {
            let more = compiles <= extra;
            core.step(SessionEvent::Compiled(Ok(output(true, more))));
            core.step(SessionEvent::AssetsEmitted(Ok(())));
            let step = core.step(SessionEvent::RecordsWritten(Ok(())));
            if !more {
                prop_assert!(matches!(step.commands[..], [SessionCommand::NotifyFinished(_)]));
                break;
            }
            core.step(SessionEvent::PassAdvanced(Ok(())));
            compiles += 1;
        }

        prop_assert_eq!(compiles, extra + 1);
        prop_assert_eq!(core.pass(), extra + 1);
        prop_assert_eq!(core.cycle(), 1);
    }
}
