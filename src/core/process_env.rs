// src/core/process_env.rs

use crate::constants::{CONTROL_MASTER_DIR, env_vars};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::PathBuf;

/// The environment-variable set handed to every spawned tool.
///
/// It is seeded once per run (usually from the inherited host environment), grown with
/// [`ProcessEnv::append`] and [`ProcessEnv::set`], and only turned into real environment
/// variables when a child process is spawned. `ursula`'s own environment is never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnv {
    vars: BTreeMap<OsString, OsString>,
}

impl ProcessEnv {
    /// An empty set. Children spawned with it see only what is added explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set seeded from the current process environment.
    /// Names and values are kept as raw OS strings.
    pub fn inherit() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Appends `value` to `key`, separated by a single space. Sets it if `key` is unset.
    pub fn append(&mut self, key: &str, value: &str) {
        self.vars
            .entry(OsString::from(key))
            .and_modify(|existing| {
                existing.push(" ");
                existing.push(value);
            })
            .or_insert_with(|| OsString::from(value));
    }

    /// Overwrites `key` unconditionally.
    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(OsString::from(key), OsString::from(value));
    }

    /// The value of `key`, or `None` when it is unset or not valid UTF-8.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(OsStr::new(key)).and_then(|value| value.to_str())
    }

    /// Every variable in name order, ready for [`std::process::Command::envs`].
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    /// Applies the composition every run starts from.
    ///
    /// The three `ANSIBLE_SSH_ARGS` fragments are appended in this exact order; consumers
    /// split the variable on whitespace.
    pub fn apply_defaults(&mut self) {
        self.append(env_vars::PYTHON_UNBUFFERED, "1");
        self.append(env_vars::PYTHON_IO_ENCODING, "UTF-8");
        self.append(env_vars::ANSIBLE_FORCE_COLOR, "yes");
        self.append(env_vars::ANSIBLE_SSH_ARGS, "-o ControlMaster=auto");
        self.append(
            env_vars::ANSIBLE_SSH_ARGS,
            &format!("-o ControlPath={}/u-%r@%h:%p", CONTROL_MASTER_DIR),
        );
        self.append(env_vars::ANSIBLE_SSH_ARGS, "-o ControlPersist=300");
    }
}

/// Makes sure the directory referenced by `ControlPath` exists. ssh refuses to open a
/// master connection otherwise.
pub fn ensure_control_master_dir() {
    let expanded = shellexpand::tilde(CONTROL_MASTER_DIR);
    let dir = PathBuf::from(expanded.into_owned());
    if dir.is_dir() {
        return;
    }
    match fs::create_dir_all(&dir) {
        Ok(()) => log::debug!("Created control master directory '{}'", dir.display()),
        Err(e) => log::warn!(
            "Could not create control master directory '{}': {}",
            dir.display(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_unset_key_sets_value() {
        let mut env = ProcessEnv::new();
        env.append("K", "a");
        assert_eq!(env.get("K"), Some("a"));
    }

    #[test]
    fn test_append_concatenates_with_single_space() {
        let mut env = ProcessEnv::new();
        env.append("K", "a");
        env.append("K", "b");
        assert_eq!(env.get("K"), Some("a b"));
    }

    #[test]
    fn test_set_overwrites() {
        let mut env = ProcessEnv::new();
        env.append("K", "a");
        env.set("K", "b");
        assert_eq!(env.get("K"), Some("b"));
    }

    #[test]
    fn test_defaults_ssh_args_order() {
        let mut env = ProcessEnv::new();
        env.apply_defaults();

        let ssh_args = env.get(env_vars::ANSIBLE_SSH_ARGS).unwrap();
        assert_eq!(
            ssh_args,
            "-o ControlMaster=auto -o ControlPath=~/.ssh/controlmasters/u-%r@%h:%p -o ControlPersist=300"
        );
        assert_eq!(env.get(env_vars::PYTHON_UNBUFFERED), Some("1"));
        assert_eq!(env.get(env_vars::PYTHON_IO_ENCODING), Some("UTF-8"));
        assert_eq!(env.get(env_vars::ANSIBLE_FORCE_COLOR), Some("yes"));
    }

    #[test]
    fn test_defaults_preserve_inherited_ssh_args() {
        let mut env = ProcessEnv::new();
        env.set(env_vars::ANSIBLE_SSH_ARGS, "-o User=deploy");
        env.apply_defaults();

        let ssh_args = env.get(env_vars::ANSIBLE_SSH_ARGS).unwrap();
        assert!(ssh_args.starts_with("-o User=deploy -o ControlMaster=auto "));
        assert!(ssh_args.ends_with("-o ControlPersist=300"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_values_are_kept() {
        use std::os::unix::ffi::OsStrExt;

        let raw = OsStr::from_bytes(b"caf\xe9");
        let mut env = ProcessEnv::new();
        env.vars.insert(OsString::from("LEGACY"), raw.to_os_string());
        env.append("LEGACY", "x");

        assert_eq!(env.get("LEGACY"), None);
        let (_, value) = env
            .iter()
            .find(|(key, _)| *key == OsStr::new("LEGACY"))
            .unwrap();
        assert_eq!(value.as_bytes(), b"caf\xe9 x");
    }

    #[test]
    fn test_clones_do_not_share_mutations() {
        let mut parent = ProcessEnv::new();
        parent.set("K", "a");
        let mut child = parent.clone();
        child.append("K", "b");
        assert_eq!(parent.get("K"), Some("a"));
        assert_eq!(child.get("K"), Some("a b"));
    }
}
