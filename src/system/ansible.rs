// src/system/ansible.rs

use crate::{
    core::process_env::ProcessEnv,
    models::{AnsibleConfig, Environment, Invocation},
    system::executor::{self, ExecutionError, ProcessRunner},
};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Why the installed `ansible-playbook` was rejected.
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Error discovering ansible version: {0}")]
    Discovery(#[from] ExecutionError),
    #[error("Could not parse the ansible version from '{0}'")]
    Unparseable(String),
    #[error(
        "You are not using ansible-playbook '{required}'. Current version is: '{found}'. \
         You may install the correct version with 'pip install -U -r requirements.txt'"
    )]
    Mismatch { found: String, required: String },
}

/// Builds the main `ansible-playbook` invocation.
///
/// Extra arguments are appended after the playbook, in the order they were collected.
pub fn playbook_invocation(
    config: &AnsibleConfig,
    environment: &Environment,
    playbook: &str,
    extra_args: &[String],
) -> Invocation {
    Invocation::new(&config.executable)
        .arg("--inventory-file")
        .arg(environment.inventory.to_string_lossy())
        .arg("--user")
        .arg(&config.user)
        .arg("--module-path")
        .arg(&config.module_path)
        .arg(playbook)
        .args(extra_args.iter().cloned())
}

/// Extracts the version from the output of `ansible-playbook --version`.
///
/// Handles both `ansible-playbook 1.7.2-bbg` and `ansible-playbook [core 2.15.0]`. Lines
/// that do not start with the program name (warnings written to stderr) are skipped.
pub fn parse_version(output: &str) -> Option<String> {
    static VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = VERSION_RE
        .get_or_init(|| Regex::new(r"^ansible\S*\s+\[?(?:core\s+)?([^\s\]]+)").ok())
        .as_ref()?;
    output
        .lines()
        .find_map(|line| re.captures(line.trim()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Runs `ansible-playbook --version` (bounded by the configured timeout) and compares the
/// result with the required version.
pub fn check_version(
    runner: &dyn ProcessRunner,
    env: &ProcessEnv,
    config: &AnsibleConfig,
) -> Result<String, VersionError> {
    let invocation = Invocation::new(&config.executable)
        .arg("--version")
        .with_timeout(config.version_timeout());
    let output = executor::capture_output(runner, &invocation, env)?;
    let found = parse_version(&output)
        .ok_or_else(|| VersionError::Unparseable(output.trim().to_string()))?;

    if found != config.required_version {
        return Err(VersionError::Mismatch {
            found,
            required: config.required_version.clone(),
        });
    }
    log::debug!("Using ansible-playbook {}", found);
    Ok(found)
}
