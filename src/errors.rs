// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("File watcher error: {0}")]
    NotifyError(#[from] notify::Error),

    #[error("Watch error: {0}")]
    WatchError(String),

    #[error("Build command exited with code {0}")]
    CommandFailed(i32),

    #[error("Build did not converge after {0} passes")]
    PassLimitExceeded(u32),

    #[error("Cache shutdown failed: {0}")]
    CacheShutdown(String),

    #[error("Build session is closed")]
    SessionClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RewatchError>;
