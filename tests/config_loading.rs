// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use rewatch::config::{load_and_validate, ConfigFile, DEFAULT_AGGREGATE_TIMEOUT_MS};
use rewatch::errors::RewatchError;
use rewatch::types::RecordStorageMode;
use rewatch_test_utils::builders::ConfigFileBuilder;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str) -> String {
    let file = write_config(contents);
    match load_and_validate(file.path()) {
        Err(RewatchError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(cfg) => panic!("Expected error, got Ok: {:?}", cfg),
    }
}

#[test]
fn minimal_config_uses_defaults() {
    let file = write_config(
        r#"
[build]
cmd = "make"
watch = ["src/**/*.c"]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.build.cmd, "make");
    assert_eq!(cfg.build.watch, vec!["src/**/*.c".to_string()]);
    assert!(cfg.build.exclude.is_empty());
    assert_eq!(cfg.build.records, RecordStorageMode::File);
    assert_eq!(RecordStorageMode::default(), RecordStorageMode::File);
    assert!(!cfg.build.converge);
    assert_eq!(cfg.build.max_passes, None);
    assert_eq!(cfg.watch.aggregate_timeout_ms, DEFAULT_AGGREGATE_TIMEOUT_MS);
    assert!(cfg.watch.ignored.is_empty());

    let options = cfg.session_options();
    assert_eq!(
        options.watch.aggregate_timeout,
        Duration::from_millis(DEFAULT_AGGREGATE_TIMEOUT_MS)
    );
    assert_eq!(options.max_passes, None);
}

#[test]
fn full_config_is_carried_into_session_options() {
    let file = write_config(
        r#"
[watch]
aggregate_timeout_ms = 75
ignored = [".git/**", "*.swp"]

[build]
cmd = "cargo build"
watch = ["src/**/*.rs", "Cargo.toml"]
exclude = ["src/generated/**"]
records = "memory"
converge = true
max_passes = 3
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.build.records, RecordStorageMode::Memory);
    assert!(cfg.build.converge);
    assert_eq!(cfg.build.exclude, vec!["src/generated/**".to_string()]);

    let options = cfg.session_options();
    assert_eq!(options.watch.aggregate_timeout, Duration::from_millis(75));
    assert_eq!(options.watch.ignored, vec![".git/**", "*.swp"]);
    assert_eq!(options.max_passes, Some(3));
}

#[test]
fn empty_command_is_rejected() {
    let msg = expect_config_error(
        r#"
[build]
cmd = "   "
watch = ["src/**"]
"#,
    );
    assert!(msg.contains("[build].cmd"));
}

#[test]
fn missing_watch_patterns_are_rejected() {
    let msg = expect_config_error(
        r#"
[build]
cmd = "make"
"#,
    );
    assert!(msg.contains("at least one pattern"));
}

#[test]
fn malformed_glob_names_the_field() {
    let msg = expect_config_error(
        r#"
[build]
cmd = "make"
watch = ["src/**"]
exclude = ["src/[oops"]
"#,
    );
    assert!(msg.contains("src/[oops"));
    assert!(msg.contains("[build].exclude"));

    let msg = expect_config_error(
        r#"
[watch]
ignored = ["{unclosed"]

[build]
cmd = "make"
watch = ["src/**"]
"#,
    );
    assert!(msg.contains("[watch].ignored"));
}

#[test]
fn zero_aggregate_timeout_is_rejected() {
    let msg = expect_config_error(
        r#"
[watch]
aggregate_timeout_ms = 0

[build]
cmd = "make"
watch = ["src/**"]
"#,
    );
    assert!(msg.contains("aggregate_timeout_ms"));
}

#[test]
fn zero_max_passes_is_rejected() {
    let raw = ConfigFileBuilder::new("make")
        .watch("src/**")
        .max_passes(0)
        .build_raw();

    match ConfigFile::try_from(raw) {
        Err(RewatchError::ConfigError(msg)) => assert!(msg.contains("max_passes")),
        other => panic!("Expected ConfigError, got: {:?}", other),
    }
}

#[test]
fn unknown_records_mode_fails_to_parse() {
    let file = write_config(
        r#"
[build]
cmd = "make"
watch = ["src/**"]
records = "redis"
"#,
    );

    assert!(matches!(
        load_and_validate(file.path()),
        Err(RewatchError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_and_validate(dir.path().join("Rewatch.toml"));
    assert!(matches!(result, Err(RewatchError::IoError(_))));
}

#[test]
fn builder_produces_valid_config() {
    let cfg = ConfigFileBuilder::new("npm run build")
        .watch("src/**/*.ts")
        .exclude("src/**/*.test.ts")
        .ignored("node_modules/**")
        .aggregate_timeout_ms(20)
        .records(RecordStorageMode::Memory)
        .converge(true)
        .max_passes(4)
        .build();

    assert_eq!(cfg.watch_config().aggregate_timeout, Duration::from_millis(20));
    assert_eq!(cfg.session_options().max_passes, Some(4));
}

#[test]
fn demo_configs_are_valid() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");

    let rust = load_and_validate(root.join("Rewatch.toml")).unwrap();
    assert_eq!(rust.build.cmd, "cargo build --quiet");
    assert_eq!(rust.build.records, RecordStorageMode::File);

    let c = load_and_validate(root.join("c-project/Rewatch.toml")).unwrap();
    assert!(c.build.converge);
    assert_eq!(c.session_options().max_passes, Some(3));
}
