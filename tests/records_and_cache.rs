// tests/records_and_cache.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rewatch::errors::RewatchError;
use rewatch::fs::mock::MockFileSystem;
use rewatch::fs::FileSystem;
use rewatch::pipeline::cache::CacheStats;
use rewatch::pipeline::{
    BuildRecords, FileRecordStore, HashCache, MemoryRecordStore, RecordStore, ResultCache,
};
use rewatch_test_utils::builders::at;

fn sample_records() -> BuildRecords {
    let mut files = BTreeMap::new();
    files.insert(PathBuf::from("/p/src/main.rs"), "aaa".to_string());
    files.insert(PathBuf::from("/p/src/with space.rs"), "bbb".to_string());
    BuildRecords {
        fingerprint: "f00d".to_string(),
        files,
    }
}

#[test]
fn file_store_persists_records_under_state_dir() {
    let fs = Arc::new(MockFileSystem::new());
    let mut store = FileRecordStore::new(PathBuf::from("/p"), fs.clone());

    assert_eq!(store.path(), PathBuf::from("/p/.rewatch/records"));
    assert_eq!(store.load().unwrap(), None);

    store.save(&sample_records()).unwrap();
    assert!(fs.exists(Path::new("/p/.rewatch/records")));

    let reopened = FileRecordStore::new(PathBuf::from("/p"), fs);
    assert_eq!(reopened.load().unwrap(), Some(sample_records()));
}

#[test]
fn corrupt_records_file_is_an_error() {
    let fs = Arc::new(MockFileSystem::new());
    let store = FileRecordStore::new(PathBuf::from("/p"), fs.clone());

    fs.add_file("/p/.rewatch/records", "garbage\n");
    let err = store.load().unwrap_err();
    assert!(format!("{err:#}").contains("expected two fields"));

    fs.add_file("/p/.rewatch/records", "abc /p/src/main.rs\n");
    let err = store.load().unwrap_err();
    assert!(format!("{err:#}").contains("missing fingerprint"));
}

#[test]
fn memory_store_keeps_last_save() {
    let mut store = MemoryRecordStore::new();
    assert_eq!(store.load().unwrap(), None);

    store.save(&sample_records()).unwrap();
    let mut updated = sample_records();
    updated.fingerprint = "beef".to_string();
    store.save(&updated).unwrap();

    assert_eq!(store.load().unwrap(), Some(updated));
}

#[test]
fn hash_cache_reuses_entries_until_mtime_changes() {
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("/p/a.txt", "one");
    let cache = HashCache::new(fs.clone());
    let path = Path::new("/p/a.txt");

    let first = cache.hash_file(path, None).unwrap();
    let second = cache.hash_file(path, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        cache.stats(),
        CacheStats {
            entries: 1,
            hits: 1,
            misses: 1,
            active: false,
        }
    );

    fs.add_file("/p/a.txt", "two");
    let third = cache.hash_file(path, None).unwrap();
    assert_ne!(first, third);
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn hash_cache_trusts_watcher_mtime() {
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("/p/a.txt", "one");
    let cache = HashCache::new(fs.clone());
    let path = Path::new("/p/a.txt");

    cache.hash_file(path, Some(at(5))).unwrap();
    cache.hash_file(path, Some(at(5))).unwrap();
    assert_eq!(cache.stats().hits, 1);

    cache.hash_file(path, Some(at(6))).unwrap();
    assert_eq!(cache.stats().misses, 2);

    cache.invalidate(path);
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn idle_prunes_vanished_files() {
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("/p/a.txt", "a");
    fs.add_file("/p/b.txt", "b");
    let cache = HashCache::new(fs.clone());

    cache.enter_active().await.unwrap();
    assert!(cache.is_active());
    cache.hash_file(Path::new("/p/a.txt"), None).unwrap();
    cache.hash_file(Path::new("/p/b.txt"), None).unwrap();

    fs.remove_file(Path::new("/p/b.txt")).unwrap();
    cache.enter_idle().await;

    assert!(!cache.is_active());
    assert_eq!(cache.stats().entries, 1);
}

#[tokio::test]
async fn shutdown_happens_once() {
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("/p/a.txt", "a");
    let cache = HashCache::new(fs);

    cache.hash_file(Path::new("/p/a.txt"), None).unwrap();
    cache.shutdown().await.unwrap();
    assert_eq!(cache.stats().entries, 0);

    assert!(matches!(
        cache.shutdown().await,
        Err(RewatchError::CacheShutdown(_))
    ));
    assert!(matches!(
        cache.enter_active().await,
        Err(RewatchError::CacheShutdown(_))
    ));
    assert!(cache.hash_file(Path::new("/p/a.txt"), None).is_err());
}
