// src/config/validate.rs

use globset::Glob;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, RewatchError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RewatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.watch, raw.build))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_watch_section(cfg)?;
    validate_build_command(cfg)?;
    validate_patterns(cfg)?;
    validate_max_passes(cfg)?;
    Ok(())
}

fn validate_watch_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.watch.aggregate_timeout_ms == 0 {
        return Err(RewatchError::ConfigError(
            "[watch].aggregate_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    for pat in cfg.watch.ignored.iter() {
        check_glob("[watch].ignored", pat)?;
    }
    Ok(())
}

fn validate_build_command(cfg: &RawConfigFile) -> Result<()> {
    if cfg.build.cmd.trim().is_empty() {
        return Err(RewatchError::ConfigError(
            "[build].cmd must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_patterns(cfg: &RawConfigFile) -> Result<()> {
    if cfg.build.watch.is_empty() {
        return Err(RewatchError::ConfigError(
            "[build].watch must contain at least one pattern".to_string(),
        ));
    }
    for pat in cfg.build.watch.iter() {
        check_glob("[build].watch", pat)?;
    }
    for pat in cfg.build.exclude.iter() {
        check_glob("[build].exclude", pat)?;
    }
    Ok(())
}

fn validate_max_passes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.build.max_passes == Some(0) {
        return Err(RewatchError::ConfigError(
            "[build].max_passes must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn check_glob(field: &str, pattern: &str) -> Result<()> {
    Glob::new(pattern).map(|_| ()).map_err(|e| {
        RewatchError::ConfigError(format!("invalid glob pattern '{pattern}' in {field}: {e}"))
    })
}
