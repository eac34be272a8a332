// tests/command_pipeline.rs
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use rewatch::engine::Session;
use rewatch::fs::{FileSystem, RealFileSystem};
use rewatch::pipeline::{
    BuildContext, BuildOutput, BuildPipeline, CommandPipeline, FileRecordStore, HashCache,
    MemoryRecordStore, RecordStore,
};
use rewatch::types::BuildInputs;
use rewatch::watch::NotifyWatchFileSystem;
use rewatch_test_utils::builders::ConfigFileBuilder;
use rewatch_test_utils::{init_tracing, with_timeout};

fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/main.c"), "int main() { return 0; }").unwrap();
    dir
}

fn pipeline(root: &Path, builder: ConfigFileBuilder, store: Box<dyn RecordStore>) -> CommandPipeline {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cfg = builder.build();
    CommandPipeline::new(
        root.to_path_buf(),
        &cfg.build,
        Arc::clone(&fs),
        Arc::new(HashCache::new(fs)),
        store,
    )
    .unwrap()
}

/// Drive one pass the way the session does.
async fn run_pass(p: &CommandPipeline) -> rewatch::errors::Result<bool> {
    let output = p.compile(&BuildInputs::default()).await?;
    let emitted = output.should_emit();
    if emitted {
        p.emit_assets(&output).await?;
        p.write_records().await?;
    }
    Ok(emitted)
}

#[tokio::test]
async fn command_runs_only_when_inputs_change() {
    init_tracing();
    let dir = project();
    let p = pipeline(
        dir.path(),
        ConfigFileBuilder::new("echo built >> build.log").watch("src/**"),
        Box::new(MemoryRecordStore::new()),
    );

    with_timeout(p.load_records()).await.unwrap();
    assert!(with_timeout(run_pass(&p)).await.unwrap());
    assert!(!with_timeout(run_pass(&p)).await.unwrap());

    fs::write(dir.path().join("src/main.c"), "int main() { return 1; }").unwrap();
    assert!(with_timeout(run_pass(&p)).await.unwrap());

    let log = fs::read_to_string(dir.path().join("build.log")).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[tokio::test]
async fn output_reports_inputs_and_dependencies() {
    init_tracing();
    let dir = project();
    let p = pipeline(
        dir.path(),
        ConfigFileBuilder::new("true")
            .watch("src/**/*.c")
            .watch("gen/**/*.c")
            .watch("config.mk"),
        Box::new(MemoryRecordStore::new()),
    );

    let output = with_timeout(p.compile(&BuildInputs::default())).await.unwrap();
    assert!(output.changed());
    assert_eq!(output.file_dependencies(), &[dir.path().join("src/main.c")]);
    assert_eq!(output.context_dependencies(), &[dir.path().join("src")]);
    assert_eq!(
        output.missing_dependencies(),
        &[dir.path().join("config.mk"), dir.path().join("gen")]
    );
    assert!(!output.needs_additional_pass());
}

#[tokio::test]
async fn failing_command_completes_with_its_exit_code() {
    init_tracing();
    let dir = project();
    let p = pipeline(
        dir.path(),
        ConfigFileBuilder::new("echo oops >&2; exit 3").watch("src/**"),
        Box::new(MemoryRecordStore::new()),
    );

    let output = with_timeout(p.compile(&BuildInputs::default())).await.unwrap();
    with_timeout(p.emit_assets(&output)).await.unwrap();
    assert_eq!(output.failed_exit_code(), Some(3));
    assert!(!output.needs_additional_pass());

    // Nothing is recorded, so unchanged inputs still rerun the command.
    with_timeout(p.write_records()).await.unwrap();
    assert_eq!(p.written_fingerprint(), None);
    let again = with_timeout(p.compile(&BuildInputs::default())).await.unwrap();
    assert!(again.should_emit());
}

#[tokio::test]
async fn session_keeps_watching_after_a_failed_command() {
    init_tracing();
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let cfg = ConfigFileBuilder::new("grep -q good src/main.c")
        .watch("src/**")
        .aggregate_timeout_ms(50)
        .build();

    let cache = Arc::new(HashCache::new(Arc::clone(&fs)));
    let p = Arc::new(
        CommandPipeline::new(
            root.clone(),
            &cfg.build,
            Arc::clone(&fs),
            Arc::clone(&cache),
            Box::new(MemoryRecordStore::new()),
        )
        .unwrap(),
    );
    let watch_fs = Arc::new(NotifyWatchFileSystem::new(Arc::clone(&fs)));
    let (handle, mut reports) =
        Session::start(BuildContext::new(p, cache, watch_fs), cfg.session_options());

    let first = with_timeout(reports.recv()).await.unwrap().unwrap();
    let build = first.build.as_ref().unwrap();
    assert_eq!(build.failed_exit_code(), Some(1));

    // Let the watcher arm before fixing the source.
    tokio::time::sleep(Duration::from_millis(200)).await;
    fs::write(root.join("src/main.c"), "int main() { return 0; } // good").unwrap();

    let second = with_timeout(reports.recv()).await.unwrap().unwrap();
    let build = second.build.as_ref().unwrap();
    assert_eq!(build.failed_exit_code(), None);
    assert!(build.changed());

    with_timeout(handle.close()).await.unwrap();
}

#[tokio::test]
async fn persisted_records_skip_the_first_build() {
    init_tracing();
    let dir = project();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let first = pipeline(
        dir.path(),
        ConfigFileBuilder::new("true").watch("src/**"),
        Box::new(FileRecordStore::new(dir.path().to_path_buf(), Arc::clone(&fs))),
    );
    with_timeout(first.load_records()).await.unwrap();
    assert!(with_timeout(run_pass(&first)).await.unwrap());
    assert!(dir.path().join(".rewatch/records").is_file());

    let second = pipeline(
        dir.path(),
        ConfigFileBuilder::new("true").watch("src/**"),
        Box::new(FileRecordStore::new(dir.path().to_path_buf(), fs)),
    );
    with_timeout(second.load_records()).await.unwrap();
    assert_eq!(second.written_fingerprint(), first.written_fingerprint());
    assert!(!with_timeout(run_pass(&second)).await.unwrap());
}

#[tokio::test]
async fn converge_requests_a_pass_when_command_rewrites_inputs() {
    init_tracing();
    let dir = project();
    let p = pipeline(
        dir.path(),
        ConfigFileBuilder::new("printf generated > src/gen.c")
            .watch("src/**")
            .converge(true),
        Box::new(MemoryRecordStore::new()),
    );

    let output = with_timeout(p.compile(&BuildInputs::default())).await.unwrap();
    with_timeout(p.emit_assets(&output)).await.unwrap();
    assert!(output.needs_additional_pass());
    with_timeout(p.write_records()).await.unwrap();

    // Same content on the second run: converged.
    let output = with_timeout(p.compile(&BuildInputs::default())).await.unwrap();
    assert!(output.should_emit());
    with_timeout(p.emit_assets(&output)).await.unwrap();
    assert!(!output.needs_additional_pass());
}
