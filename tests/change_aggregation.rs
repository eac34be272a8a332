// tests/change_aggregation.rs

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rewatch::config::WatchConfig;
use rewatch::fs::mock::MockFileSystem;
use rewatch::watch::aggregator::{ChangeAggregator, ChangeKind};
use rewatch::watch::path_utils::relative_str;
use rewatch::watch::{
    collect_matching_files, compute_aggregate_hash, DependencyPatterns, WatchRequest,
};
use rewatch_test_utils::builders::at;

const WINDOW: Duration = Duration::from_millis(50);

fn request(ignored: &[&str]) -> WatchRequest {
    WatchRequest {
        files: vec![PathBuf::from("/p/src/main.rs"), PathBuf::from("/p/Cargo.toml")],
        dirs: vec![PathBuf::from("/p/src"), PathBuf::from("/p/src/nested")],
        missing: vec![PathBuf::from("/p/build.config")],
        start_time: at(100),
        config: WatchConfig {
            aggregate_timeout: WINDOW,
            ignored: ignored.iter().map(|s| s.to_string()).collect(),
            root: Some(PathBuf::from("/p")),
        },
    }
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

#[test]
fn seed_before_start_only_records_timestamps() {
    let mut agg = ChangeAggregator::new(&request(&[])).unwrap();
    let now = Instant::now();

    agg.seed(Path::new("/p/src/main.rs"), at(90), now);
    agg.seed(Path::new("/p/src/nested/util.rs"), at(95), now);

    assert!(!agg.has_pending());
    assert_eq!(agg.deadline(), None);
    assert_eq!(
        agg.file_timestamps().get(Path::new("/p/src/main.rs")).map(|t| t.safe_time),
        Some(at(90))
    );
    assert_eq!(
        agg.context_timestamps().get(Path::new("/p/src/nested")).map(|t| t.safe_time),
        Some(at(95))
    );
}

#[test]
fn seed_after_start_counts_as_change() {
    let mut agg = ChangeAggregator::new(&request(&[])).unwrap();
    let now = Instant::now();

    agg.seed(Path::new("/p/Cargo.toml"), at(101), now);

    assert!(agg.has_pending());
    assert_eq!(agg.deadline(), Some(now + WINDOW));
    let batch = agg.take_batch();
    assert_eq!(batch.changed_files, paths(&["/p/Cargo.toml"]));
}

#[test]
fn unrelated_and_ignored_paths_are_dropped() {
    let mut agg = ChangeAggregator::new(&request(&["**/*.swp"])).unwrap();
    let now = Instant::now();

    assert!(!agg.record(Path::new("/p/README.md"), ChangeKind::Modified(at(120)), now));
    assert!(!agg.record(Path::new("/p/src/.main.rs.swp"), ChangeKind::Modified(at(120)), now));
    assert!(!agg.has_pending());
    assert_eq!(agg.deadline(), None);
}

#[test]
fn ignored_globs_are_relative_to_the_root() {
    let mut req = request(&[".git/**", "target/**"]);
    req.dirs = vec![PathBuf::from("/p")];
    let mut agg = ChangeAggregator::new(&req).unwrap();
    let now = Instant::now();

    assert!(!agg.is_relevant(Path::new("/p/.git/index")));
    assert!(!agg.record(Path::new("/p/target/debug/app"), ChangeKind::Modified(at(120)), now));
    assert!(!agg.has_pending());

    // Same names deeper in the tree are not anchored at the root.
    assert!(agg.record(Path::new("/p/src/target/x.rs"), ChangeKind::Modified(at(120)), now));
}

#[test]
fn ignored_globs_match_absolute_paths_without_a_root() {
    let mut req = request(&["/p/src/**/*.bak"]);
    req.config.root = None;
    let agg = ChangeAggregator::new(&req).unwrap();

    assert!(!agg.is_relevant(Path::new("/p/src/main.rs.bak")));
    assert!(agg.is_relevant(Path::new("/p/src/main.rs")));
}

#[test]
fn state_dir_writes_are_never_changes() {
    let mut agg = ChangeAggregator::new(&request(&[])).unwrap();
    let now = Instant::now();

    assert!(!agg.record(
        Path::new("/p/src/.rewatch/records.tmp"),
        ChangeKind::Modified(at(120)),
        now
    ));
    assert!(!agg.has_pending());
}

#[test]
fn every_change_extends_the_debounce_window() {
    let mut agg = ChangeAggregator::new(&request(&[])).unwrap();
    let t0 = Instant::now();

    assert!(agg.record(Path::new("/p/src/main.rs"), ChangeKind::Modified(at(110)), t0));
    let t1 = t0 + Duration::from_millis(30);
    assert!(agg.record(Path::new("/p/src/lib.rs"), ChangeKind::Modified(at(111)), t1));

    assert!(!agg.is_due(t0 + WINDOW));
    assert!(agg.is_due(t1 + WINDOW));
}

#[test]
fn batch_groups_files_contexts_and_removals() {
    let mut agg = ChangeAggregator::new(&request(&[])).unwrap();
    let now = Instant::now();

    agg.record(Path::new("/p/src/main.rs"), ChangeKind::Modified(at(110)), now);
    agg.record(Path::new("/p/src/nested/deep.rs"), ChangeKind::Modified(at(112)), now);
    agg.record(Path::new("/p/src/old.rs"), ChangeKind::Removed, now);
    agg.record(Path::new("/p/build.config"), ChangeKind::Modified(at(113)), now);

    let batch = agg.take_batch();
    assert_eq!(batch.changed_files, paths(&["/p/build.config", "/p/src/main.rs"]));
    assert_eq!(batch.changed_contexts, paths(&["/p/src", "/p/src/nested"]));
    assert_eq!(batch.removed_files, paths(&["/p/src/old.rs"]));
    assert_eq!(
        batch.file_timestamps.get(Path::new("/p/src/main.rs")).map(|t| t.safe_time),
        Some(at(110))
    );
    assert!(batch.context_timestamps.contains(Path::new("/p/src/nested")));

    // Draining keeps timestamps but clears pending changes.
    assert!(!agg.has_pending());
    assert_eq!(agg.deadline(), None);
    assert_eq!(agg.file_timestamps().len(), 2);
}

#[test]
fn recreated_file_is_no_longer_removed() {
    let mut agg = ChangeAggregator::new(&request(&[])).unwrap();
    let now = Instant::now();

    agg.record(Path::new("/p/src/main.rs"), ChangeKind::Removed, now);
    agg.record(Path::new("/p/src/main.rs"), ChangeKind::Modified(at(130)), now);

    let batch = agg.take_batch();
    assert!(batch.removed_files.is_empty());
    assert_eq!(batch.changed_files, paths(&["/p/src/main.rs"]));
}

#[test]
fn patterns_resolve_context_dirs_and_literals() {
    let watch = vec!["src/**/*.rs".to_string(), "Cargo.toml".to_string(), "*.md".to_string()];
    let patterns = DependencyPatterns::new(&watch, &[]).unwrap();
    let root = Path::new("/p");

    assert_eq!(patterns.context_dirs(root), paths(&["/p", "/p/src"]));
    assert_eq!(patterns.literal_paths(root), paths(&["/p/Cargo.toml"]));
    assert!(patterns.matches("src/a/b.rs"));
    assert!(patterns.matches("Cargo.toml"));
    assert!(!patterns.matches("src/a/b.txt"));
}

#[test]
fn state_dir_is_never_an_input() {
    let patterns = DependencyPatterns::new(&["**".to_string()], &[]).unwrap();
    assert!(patterns.matches("src/main.rs"));
    assert!(!patterns.matches(".rewatch/records"));
}

#[test]
fn matching_files_respect_exclude_and_skip_state_dirs() {
    let fs = MockFileSystem::new();
    fs.add_file("/p/src/main.rs", "fn main() {}");
    fs.add_file("/p/src/gen/out.rs", "// generated");
    fs.add_file("/p/src/notes.txt", "todo");
    fs.add_file("/p/.rewatch/records", "fingerprint x");
    fs.add_file("/p/.git/HEAD", "ref");

    let patterns = DependencyPatterns::new(
        &["src/**/*.rs".to_string(), "**/HEAD".to_string(), "**/records".to_string()],
        &["src/gen/**".to_string()],
    )
    .unwrap();

    let files = collect_matching_files(&fs, Path::new("/p"), &patterns).unwrap();
    assert_eq!(files, paths(&["/p/src/main.rs"]));
}

#[test]
fn relative_paths_use_forward_slashes() {
    assert_eq!(
        relative_str(Path::new("/p"), Path::new("/p/src/a.rs")),
        Some("src/a.rs".to_string())
    );
    assert_eq!(
        relative_str(Path::new("."), Path::new("./src/a.rs")),
        Some("src/a.rs".to_string())
    );
    assert_eq!(relative_str(Path::new("/p"), Path::new("/elsewhere/a.rs")), None);
}

#[test]
fn aggregate_hash_ignores_order_but_not_paths() {
    let a = compute_aggregate_hash([
        (Path::new("/p/a"), "h1"),
        (Path::new("/p/b"), "h2"),
    ]);
    let b = compute_aggregate_hash([
        (Path::new("/p/b"), "h2"),
        (Path::new("/p/a"), "h1"),
    ]);
    let renamed = compute_aggregate_hash([
        (Path::new("/p/a"), "h1"),
        (Path::new("/p/c"), "h2"),
    ]);

    assert_eq!(a, b);
    assert_ne!(a, renamed);
}
