// tests/notify_watcher.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

use rewatch::config::WatchConfig;
use rewatch::fs::RealFileSystem;
use rewatch::types::ChangeBatch;
use rewatch::watch::{
    NotifyWatchFileSystem, WatchEvent, WatchFileSystem, WatchId, WatchRequest, WatchSink,
    WatcherHandle,
};
use rewatch_test_utils::{assert_pending, init_tracing, with_timeout};

type Events = mpsc::UnboundedReceiver<(WatchId, WatchEvent)>;

struct Project {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

fn project() -> Project {
    let dir = tempfile::tempdir().unwrap();
    // Events arrive with resolved paths on some platforms.
    let root = dir.path().canonicalize().unwrap();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/main.c"), "v1").unwrap();
    Project { _dir: dir, root }
}

fn arm(root: &Path, start_time: SystemTime) -> (Box<dyn WatcherHandle>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let request = WatchRequest {
        files: vec![root.join("src/main.c")],
        dirs: vec![root.join("src")],
        missing: vec![root.join("config.mk")],
        start_time,
        config: WatchConfig::with_aggregate_timeout(Duration::from_millis(50)),
    };
    let watch_fs = NotifyWatchFileSystem::new(Arc::new(RealFileSystem));
    let handle = watch_fs
        .watch(request, WatchSink::new(WatchId(7), tx))
        .unwrap();
    (handle, rx)
}

async fn next_batch(events: &mut Events) -> ChangeBatch {
    loop {
        match events.recv().await {
            Some((id, WatchEvent::Batch(result))) => {
                assert_eq!(id, WatchId(7));
                return result.unwrap();
            }
            Some((_, WatchEvent::PathChanged { .. })) => continue,
            None => panic!("watcher channel closed"),
        }
    }
}

#[tokio::test]
async fn edit_produces_one_settled_batch() {
    init_tracing();
    let project = project();
    let (handle, mut events) = arm(&project.root, SystemTime::now() + Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(project.root.join("src/main.c"), "v2").unwrap();
    fs::write(project.root.join("src/util.c"), "new").unwrap();

    let batch = with_timeout(next_batch(&mut events)).await;
    let main = project.root.join("src/main.c");
    assert!(batch.changed_files.contains(&main));
    assert!(batch.changed_contexts.contains(&project.root.join("src")));
    assert!(batch.file_timestamps.contains(&main));

    // The watcher pauses itself after reporting.
    fs::write(project.root.join("src/main.c"), "v3").unwrap();
    assert_pending(Duration::from_millis(300), next_batch(&mut events)).await;
    assert!(handle.file_timestamps().contains(&main));

    handle.close();
}

#[tokio::test]
async fn changes_during_the_build_are_reported_on_arm() {
    init_tracing();
    let project = project();
    // The watched build started before `main.c` was last written.
    let start = SystemTime::now() - Duration::from_secs(60);
    let (handle, mut events) = arm(&project.root, start);

    let batch = with_timeout(next_batch(&mut events)).await;
    assert_eq!(batch.changed_files, vec![project.root.join("src/main.c")]);

    handle.close();
}

#[tokio::test]
async fn missing_file_creation_is_reported() {
    init_tracing();
    let project = project();
    let (handle, mut events) = arm(&project.root, SystemTime::now() + Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(project.root.join("config.mk"), "CC=cc").unwrap();

    let batch = with_timeout(next_batch(&mut events)).await;
    assert!(batch.changed_files.contains(&project.root.join("config.mk")));

    handle.close();
}

#[tokio::test]
async fn paused_watcher_stays_quiet() {
    init_tracing();
    let project = project();
    let (mut handle, mut events) = arm(&project.root, SystemTime::now() + Duration::from_secs(1));

    handle.pause();
    tokio::time::sleep(Duration::from_millis(50)).await;
    fs::write(project.root.join("src/main.c"), "v2").unwrap();

    assert_pending(Duration::from_millis(300), next_batch(&mut events)).await;
    handle.close();
}
