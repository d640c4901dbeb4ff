//! # Config Loader
//!
//! Loads the optional `ursula.toml` file that overrides executables, login defaults
//! and the bounds of the vagrant poll loop. A missing file is not an error: every field
//! has a default, so running without any configuration behaves like the stock tool.
use crate::{
    constants::{TOOL_CONFIG_FILENAME, env_vars},
    models::ToolConfig,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Failures while reading the tool configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Determines which config file applies: `$URSULA_CONFIG` if set, otherwise
/// `ursula.toml` in the working directory.
pub fn config_path() -> PathBuf {
    std::env::var_os(env_vars::URSULA_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(TOOL_CONFIG_FILENAME))
}

/// Loads the tool configuration.
///
/// When the path came from `$URSULA_CONFIG` the file must exist; the implicit
/// `ursula.toml` is optional.
pub fn load() -> Result<ToolConfig, ConfigError> {
    let explicit = std::env::var_os(env_vars::URSULA_CONFIG).is_some();
    let path = config_path();
    if !explicit && !path.exists() {
        log::debug!("No '{}' found, using built-in defaults.", path.display());
        return Ok(ToolConfig::default());
    }
    load_from(&path)
}

/// Reads and parses a config file. Unknown keys are rejected so typos surface early.
pub fn load_from(path: &Path) -> Result<ToolConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: ToolConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    log::debug!("Loaded tool config from '{}': {:?}", path.display(), config);
    Ok(config)
}
