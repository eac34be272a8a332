// src/logging.rs

//! Logging setup for `rewatch` using `tracing` + `tracing-subscriber`.
//!
//! The level comes from `--log-level` if given, otherwise from the
//! `REWATCH_LOG` environment variable, otherwise `info`. Everything is
//! written to stderr, including the relayed output of the build command.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable consulted when `--log-level` is absent.
pub const LOG_ENV_VAR: &str = "REWATCH_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let level = resolve_level(cli_level, env_value.as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

/// CLI flag first, then the environment value, then `INFO`.
pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    if let Some(lvl) = cli_level {
        return lvl.into();
    }
    env_value.and_then(level_from_env).unwrap_or(Level::INFO)
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn level_from_env(value: &str) -> Option<Level> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("warning") {
        return Some(Level::WARN);
    }
    // `Level` parses names case-insensitively, and also "1".."5".
    value.parse().ok()
}
