// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::errors::{Result, RewatchError};
use crate::pipeline::{BuildContext, BuildPipeline};
use crate::watch::{WatchEvent, WatchId, WatchRequest, WatchSink, WatcherHandle};

use super::core::SessionCore;
use super::{BuildReport, SessionCommand, SessionEvent, SessionOptions, WatchPlan};

/// Outcome published once teardown finished; `Err` carries the cache
/// shutdown failure.
type CloseOutcome = std::result::Result<(), String>;

/// Requests sent from a [`SessionHandle`] to its session loop.
#[derive(Debug)]
enum SessionRequest {
    Invalidate { done: Option<oneshot::Sender<()>> },
    Close,
}

/// Cloneable handle used to steer a running [`Session`].
///
/// Dropping every handle closes the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<SessionRequest>,
    closed: watch::Receiver<Option<CloseOutcome>>,
}

impl SessionHandle {
    /// Mark the current build stale (or start one if idle).
    pub fn invalidate(&self) {
        let _ = self.requests.send(SessionRequest::Invalidate { done: None });
    }

    /// Invalidate and wait until a subsequent cycle has been delivered
    /// successfully. Fails with [`RewatchError::SessionClosed`] if the
    /// session closes first.
    pub async fn invalidate_and_wait(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(SessionRequest::Invalidate { done: Some(tx) })
            .map_err(|_| RewatchError::SessionClosed)?;
        rx.await.map_err(|_| RewatchError::SessionClosed)
    }

    /// Request shutdown and wait for teardown. Every caller receives the
    /// same outcome; only one teardown happens.
    pub async fn close(&self) -> Result<()> {
        // The loop may already be gone; the outcome is still published.
        let _ = self.requests.send(SessionRequest::Close);

        let mut closed = self.closed.clone();
        let outcome = {
            let published = closed
                .wait_for(|outcome| outcome.is_some())
                .await
                .map_err(|_| RewatchError::SessionClosed)?;
            published.clone()
        };

        match outcome {
            Some(Err(msg)) => Err(RewatchError::CacheShutdown(msg)),
            _ => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }
}

/// What woke the session loop up.
enum Incoming<O> {
    Stage(SessionEvent<O>),
    Request(Option<SessionRequest>),
    Watch(WatchId, WatchEvent),
}

/// Async shell around [`SessionCore`].
///
/// Owns the collaborators and the watcher handle. Pipeline stages and hooks
/// run on spawned tasks that post their completion back as events, so the
/// core only ever sees one completion per in-flight stage.
pub struct Session<P: BuildPipeline> {
    core: SessionCore<P::Output>,
    ctx: BuildContext<P>,
    watch_config: WatchConfig,

    requests_rx: mpsc::UnboundedReceiver<SessionRequest>,
    requests_open: bool,
    stage_tx: mpsc::UnboundedSender<SessionEvent<P::Output>>,
    stage_rx: mpsc::UnboundedReceiver<SessionEvent<P::Output>>,
    watch_tx: mpsc::UnboundedSender<(WatchId, WatchEvent)>,
    watch_rx: mpsc::UnboundedReceiver<(WatchId, WatchEvent)>,

    watcher: Option<Box<dyn WatcherHandle>>,
    waiters: Vec<oneshot::Sender<()>>,
    reports: mpsc::UnboundedSender<BuildReport<P::Output>>,
    closed_tx: watch::Sender<Option<CloseOutcome>>,
}

impl<P: BuildPipeline> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.core.phase())
            .field("cycle", &self.core.cycle())
            .field("watcher", &self.core.watcher())
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

impl<P: BuildPipeline> Session<P> {
    /// Spawn a session onto the current Tokio runtime. Startup (loading
    /// records, then the first cycle) begins immediately.
    ///
    /// Returns the control handle and the receiver for build reports.
    pub fn start(
        ctx: BuildContext<P>,
        options: SessionOptions,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<BuildReport<P::Output>>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);

        let session = Session {
            core: SessionCore::new(&options),
            ctx,
            watch_config: options.watch,
            requests_rx,
            requests_open: true,
            stage_tx,
            stage_rx,
            watch_tx,
            watch_rx,
            watcher: None,
            waiters: Vec::new(),
            reports: reports_tx,
            closed_tx,
        };
        tokio::spawn(session.run());

        let handle = SessionHandle {
            requests: requests_tx,
            closed: closed_rx,
        };
        (handle, reports_rx)
    }

    /// Main event loop.
    async fn run(mut self) {
        info!("build session started");

        let step = self.core.start();
        for command in step.commands {
            self.execute_command(command).await;
        }

        loop {
            let incoming = tokio::select! {
                Some(event) = self.stage_rx.recv() => Incoming::Stage(event),
                request = self.requests_rx.recv(), if self.requests_open => Incoming::Request(request),
                Some((id, event)) = self.watch_rx.recv() => Incoming::Watch(id, event),
            };

            let Some(event) = self.translate(incoming) else {
                continue;
            };

            debug!(event = event.name(), phase = ?self.core.phase(), "session received event");
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await;
            }

            if !step.keep_running {
                break;
            }
        }

        info!("build session finished");
    }

    /// Turn whatever arrived into a core event. Requests that need shell
    /// state (waiters, watcher timestamps) are resolved here.
    fn translate(&mut self, incoming: Incoming<P::Output>) -> Option<SessionEvent<P::Output>> {
        match incoming {
            Incoming::Stage(event) => Some(event),
            Incoming::Request(None) => {
                info!("all session handles dropped; closing");
                self.requests_open = false;
                Some(SessionEvent::CloseRequested)
            }
            Incoming::Request(Some(SessionRequest::Close)) => Some(SessionEvent::CloseRequested),
            Incoming::Request(Some(SessionRequest::Invalidate { done })) => {
                if self.core.is_closed() {
                    // Dropping `done` fails the waiter with `SessionClosed`.
                    return None;
                }
                if let Some(done) = done {
                    self.waiters.push(done);
                }
                let timestamps = if self.core.watcher_is_active() {
                    self.watcher
                        .as_ref()
                        .map(|w| (w.file_timestamps(), w.context_timestamps()))
                } else {
                    None
                };
                Some(SessionEvent::InvalidateRequested { timestamps })
            }
            Incoming::Watch(id, WatchEvent::Batch(result)) => {
                Some(SessionEvent::WatchBatch { id, result })
            }
            Incoming::Watch(id, WatchEvent::PathChanged { path, at }) => {
                Some(SessionEvent::PathChanged { id, path, at })
            }
        }
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: SessionCommand<P::Output>) {
        debug!(command = command.name(), "executing session command");

        match command {
            SessionCommand::LoadRecords => {
                let pipeline = Arc::clone(&self.ctx.pipeline);
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.load_records().await;
                    let _ = tx.send(SessionEvent::RecordsLoaded(result));
                });
            }
            SessionCommand::BeginCycle {
                inputs,
                enter_active,
            } => {
                let ctx = self.ctx.clone();
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    if enter_active {
                        if let Err(err) = ctx.cache.enter_active().await {
                            let _ = tx.send(SessionEvent::Compiled(Err(err)));
                            return;
                        }
                    }
                    ctx.hooks.cycle_started();
                    let result = ctx.pipeline.compile(&inputs).await.map(Arc::new);
                    let _ = tx.send(SessionEvent::Compiled(result));
                });
            }
            SessionCommand::Compile { inputs } => {
                let pipeline = Arc::clone(&self.ctx.pipeline);
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.compile(&inputs).await.map(Arc::new);
                    let _ = tx.send(SessionEvent::Compiled(result));
                });
            }
            SessionCommand::EmitAssets(output) => {
                let pipeline = Arc::clone(&self.ctx.pipeline);
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.emit_assets(&output).await;
                    let _ = tx.send(SessionEvent::AssetsEmitted(result));
                });
            }
            SessionCommand::WriteRecords => {
                let pipeline = Arc::clone(&self.ctx.pipeline);
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.write_records().await;
                    let _ = tx.send(SessionEvent::RecordsWritten(result));
                });
            }
            SessionCommand::AdvancePass(interim) => {
                let hooks = Arc::clone(&self.ctx.hooks);
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    let result = hooks.cycle_advanced(&interim).await;
                    let _ = tx.send(SessionEvent::PassAdvanced(result));
                });
            }
            SessionCommand::NotifyFinished(snapshot) => {
                let hooks = Arc::clone(&self.ctx.hooks);
                let tx = self.stage_tx.clone();
                tokio::spawn(async move {
                    hooks.cycle_finished(&snapshot).await;
                    let _ = tx.send(SessionEvent::FinishNotified);
                });
            }
            SessionCommand::FailCycle {
                failure,
                enter_idle,
            } => {
                self.ctx.hooks.cycle_failed(&failure.error);
                if enter_idle {
                    self.ctx.cache.enter_idle().await;
                }
                let _ = self.reports.send(Err(failure));
            }
            SessionCommand::EnterIdle => {
                self.ctx.cache.enter_idle().await;
            }
            SessionCommand::Deliver(report) => {
                let _ = self.reports.send(report);
            }
            SessionCommand::ArmWatcher(plan) => self.arm_watcher(plan),
            SessionCommand::PauseWatcher => {
                if let Some(watcher) = self.watcher.as_mut() {
                    watcher.pause();
                }
            }
            SessionCommand::CloseWatchers => {
                if let Some(watcher) = self.watcher.take() {
                    watcher.close();
                }
            }
            SessionCommand::ReleaseWaiters => {
                let waiters = std::mem::take(&mut self.waiters);
                if !waiters.is_empty() {
                    debug!(count = waiters.len(), "releasing invalidation waiters");
                }
                for done in waiters {
                    let _ = done.send(());
                }
            }
            SessionCommand::ForwardPathChange { path, at } => {
                self.ctx.hooks.path_invalidated(&path, at);
            }
            SessionCommand::Teardown => self.teardown().await,
        }
    }

    fn arm_watcher(&mut self, plan: WatchPlan) {
        // A new registration replaces the paused one.
        if let Some(previous) = self.watcher.take() {
            previous.close();
        }

        let id = plan.id;
        let request = WatchRequest {
            files: plan.files,
            dirs: plan.dirs,
            missing: plan.missing,
            start_time: plan.start_time,
            config: self.watch_config.clone(),
        };
        let sink = WatchSink::new(id, self.watch_tx.clone());

        match self.ctx.watch_fs.watch(request, sink) {
            Ok(handle) => self.watcher = Some(handle),
            Err(err) => {
                warn!(watch_id = %id, error = %err, "failed to arm watcher");
                // Reported through the watcher channel like any other
                // watcher failure.
                let _ = self.watch_tx.send((id, WatchEvent::Batch(Err(err))));
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.close();
        }

        let outcome = match self.ctx.cache.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "cache shutdown failed");
                Err(err.to_string())
            }
        };

        self.ctx.hooks.watch_closed();

        // Pending `invalidate_and_wait` callers fail with `SessionClosed`.
        self.waiters.clear();

        self.closed_tx.send_replace(Some(outcome));
    }
}
