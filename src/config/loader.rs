// src/config/loader.rs

//! Reading `Rewatch.toml` from disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// File name looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Rewatch.toml";

/// Read and deserialize a config file without validating it.
///
/// Missing files surface as `IoError`, syntax and type mismatches as
/// `TomlError`. See [`load_and_validate`] for the checked form.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading config");
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Read, deserialize and validate a config file.
///
/// Omitted fields take their defaults. Validation rejects an empty
/// command, an empty watch list, malformed globs and zero-valued limits.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    load_from_path(path).and_then(ConfigFile::try_from)
}

/// [`DEFAULT_CONFIG_FILE`] relative to the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}
