// src/pipeline/hooks.rs

use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::errors::{Result, RewatchError};
use crate::pipeline::{BoxFuture, LifecycleHooks};
use crate::types::BuildSnapshot;

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl<O: Send + Sync + 'static> LifecycleHooks<O> for NoopHooks {}

/// Hooks that log every lifecycle event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl<O: Send + Sync + 'static> LifecycleHooks<O> for TracingHooks {
    fn cycle_started(&self) {
        info!("build cycle started");
    }

    fn path_invalidated(&self, path: &Path, at: SystemTime) {
        debug!(?path, ?at, "watched path changed");
    }

    fn cycle_advanced<'a>(&'a self, interim: &'a BuildSnapshot<O>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(
                elapsed_ms = interim.duration().as_millis() as u64,
                "build pass finished; another pass requested"
            );
            Ok(())
        })
    }

    fn cycle_finished<'a>(&'a self, snapshot: &'a BuildSnapshot<O>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            info!(
                elapsed_ms = snapshot.duration().as_millis() as u64,
                "build cycle finished"
            );
        })
    }

    fn cycle_failed(&self, error: &RewatchError) {
        warn!(error = %error, "build cycle failed");
    }

    fn watch_closed(&self) {
        info!("watching closed");
    }
}
