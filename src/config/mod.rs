// src/config/mod.rs

//! Configuration loading and validation for rewatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate commands, glob patterns and numeric limits (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    BuildSection, ConfigFile, RawConfigFile, WatchConfig, WatchSection,
    DEFAULT_AGGREGATE_TIMEOUT_MS,
};
