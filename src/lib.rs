// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::ConfigFile;
use crate::engine::{BuildReport, Session};
use crate::errors::RewatchError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::pipeline::{
    BuildContext, CommandBuild, CommandPipeline, FileRecordStore, HashCache, MemoryRecordStore,
    RecordStore, TracingHooks,
};
use crate::types::RecordStorageMode;
use crate::watch::NotifyWatchFileSystem;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the hash cache, record store and command pipeline
/// - the notify-backed watcher
/// - the build session
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone();
    let cfg = load_and_validate(&config_path)?;

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let root = config_root_dir(&config_path);
    // Watcher events carry absolute paths; keep the scan in the same form.
    let root = fs.canonicalize(&root).unwrap_or(root);

    let cache = Arc::new(HashCache::new(Arc::clone(&fs)));
    let store: Box<dyn RecordStore> = match cfg.build.records {
        RecordStorageMode::File => Box::new(FileRecordStore::new(root.clone(), Arc::clone(&fs))),
        RecordStorageMode::Memory => Box::new(MemoryRecordStore::new()),
    };
    let pipeline = Arc::new(CommandPipeline::new(
        root.clone(),
        &cfg.build,
        Arc::clone(&fs),
        Arc::clone(&cache),
        store,
    )?);

    if args.dry_run {
        print_dry_run(&cfg, &root, &pipeline)?;
        return Ok(());
    }

    let watch_fs = Arc::new(NotifyWatchFileSystem::new(Arc::clone(&fs)));
    let ctx = BuildContext::new(pipeline, cache, watch_fs).with_hooks(Arc::new(TracingHooks));
    let mut options = cfg.session_options();
    options.watch = options.watch.rooted_at(root.clone());
    let (handle, mut reports) = Session::start(ctx, options);

    // Ctrl-C → graceful close.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; closing build session");
            if let Err(err) = handle.close().await {
                error!(error = %err, "closing build session failed");
            }
        });
    }

    let mut last_exit = None;
    let mut last_failed = false;
    while let Some(report) = reports.recv().await {
        last_failed = report.is_err();
        last_exit = failed_exit_code(&report);
        log_report(&report);
        if args.once {
            break;
        }
    }

    handle.close().await?;

    if args.once {
        if let Some(code) = last_exit {
            return Err(RewatchError::CommandFailed(code).into());
        }
        if last_failed {
            bail!("build failed");
        }
    }
    Ok(())
}

fn failed_exit_code(report: &BuildReport<CommandBuild>) -> Option<i32> {
    report
        .as_ref()
        .ok()
        .and_then(|snapshot| snapshot.build.as_ref())
        .and_then(|build| build.failed_exit_code())
}

fn log_report(report: &BuildReport<CommandBuild>) {
    if let Some(code) = failed_exit_code(report) {
        warn!(exit_code = code, "build command failed; still watching");
        return;
    }
    match report {
        Ok(snapshot) => {
            let build = snapshot.build.as_ref();
            info!(
                elapsed_ms = snapshot.duration().as_millis() as u64,
                emitted = build.is_some_and(|b| b.changed()),
                fingerprint = build.map(|b| b.fingerprint()).unwrap_or("-"),
                "build succeeded"
            );
        }
        Err(failure) => {
            error!(
                error = %failure.error,
                had_output = failure.snapshot.is_some(),
                "build failed"
            );
        }
    }
}

/// Figure out the project root.
///
/// - If the config path has a non-empty parent (e.g. "configs/Rewatch.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Rewatch.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Dry-run output: resolved settings and the inputs the first cycle would
/// fingerprint.
fn print_dry_run(cfg: &ConfigFile, root: &Path, pipeline: &CommandPipeline) -> Result<()> {
    println!("rewatch dry-run");
    println!("  root = {}", root.display());
    println!("  watch.aggregate_timeout_ms = {}", cfg.watch.aggregate_timeout_ms);
    if !cfg.watch.ignored.is_empty() {
        println!("  watch.ignored = {:?}", cfg.watch.ignored);
    }
    println!();

    println!("build:");
    println!("  cmd: {}", cfg.build.cmd);
    println!("  watch: {:?}", cfg.build.watch);
    if !cfg.build.exclude.is_empty() {
        println!("  exclude: {:?}", cfg.build.exclude);
    }
    println!("  records: {:?}", cfg.build.records);
    if cfg.build.converge {
        println!("  converge: true");
    }
    if let Some(max) = cfg.build.max_passes {
        println!("  max_passes: {max}");
    }
    println!();

    let files = pipeline.input_files()?;
    let (contexts, missing) = pipeline.dependency_dirs();
    println!("inputs ({}):", files.len());
    for file in files.iter() {
        println!("  - {}", file.display());
    }
    for dir in contexts.iter() {
        println!("  dir: {}", dir.display());
    }
    for path in missing.iter() {
        println!("  missing: {}", path.display());
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
