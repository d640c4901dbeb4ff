// src/core/environment.rs

use crate::{
    constants::{
        DEFAULTS_RELATIVE_PATH, INVENTORY_FILENAME, SSH_CONFIG_FILENAME, VAGRANT_SETTINGS_FILENAME,
    },
    models::Environment,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reasons an environment directory cannot be used.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Environment '{0}' does not exist")]
    NotFound(PathBuf),
    #[error("Inventory file '{0}' does not exist")]
    InventoryMissing(PathBuf),
    #[error("Could not determine the absolute path of '{path}': {source}")]
    AbsolutePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validates an environment directory and records which optional artifacts it provides.
///
/// Only the inventory is mandatory. `../defaults.yml`, `ssh_config` and `vagrant.yml` are
/// detected by existence alone; a missing one simply disables the step that would use it.
pub fn resolve(path: &Path) -> Result<Environment, EnvironmentError> {
    if !path.exists() {
        return Err(EnvironmentError::NotFound(path.to_path_buf()));
    }

    let inventory = path.join(INVENTORY_FILENAME);
    if !inventory.is_file() {
        return Err(EnvironmentError::InventoryMissing(inventory));
    }

    let absolute_root = std::path::absolute(path).map_err(|e| EnvironmentError::AbsolutePath {
        path: path.to_path_buf(),
        source: e,
    })?;
    let absolute_root = dunce::simplified(&absolute_root).to_path_buf();

    let environment = Environment {
        root: path.to_path_buf(),
        absolute_root,
        inventory,
        defaults_file: existing_file(path.join(DEFAULTS_RELATIVE_PATH)),
        ssh_config: existing_file(path.join(SSH_CONFIG_FILENAME)),
        vagrant_settings: existing_file(path.join(VAGRANT_SETTINGS_FILENAME)),
    };
    log::debug!("Resolved environment: {:?}", environment);
    Ok(environment)
}

fn existing_file(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}
