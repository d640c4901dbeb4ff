// src/models.rs

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// --- ENVIRONMENT MODELS ---

/// A validated environment directory and the optional artifacts found inside it.
///
/// Built once per invocation by [`crate::core::environment::resolve`] and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// The path exactly as the user supplied it.
    pub root: PathBuf,
    /// The absolute form of `root`. Symlinks are not resolved.
    pub absolute_root: PathBuf,
    /// `<root>/hosts`, always present.
    pub inventory: PathBuf,
    /// `<root>/../defaults.yml`, if it is a file.
    pub defaults_file: Option<PathBuf>,
    /// `<root>/ssh_config`, if it is a file.
    pub ssh_config: Option<PathBuf>,
    /// `<root>/vagrant.yml`, if it is a file.
    pub vagrant_settings: Option<PathBuf>,
}

impl Environment {
    /// The directory name of the environment, used to key cached files.
    pub fn name(&self) -> String {
        self.absolute_root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "environment".to_string())
    }
}

/// The subset of a `vagrant.yml` file that `ursula` needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VagrantSettings {
    /// Machine name -> machine configuration. The configuration itself is opaque.
    #[serde(default)]
    pub vms: serde_yaml::Mapping,
}

impl VagrantSettings {
    /// Returns the machine names in the order they appear in the file.
    /// Keys that are not scalars are skipped.
    pub fn vm_names(&self) -> Vec<String> {
        self.vms
            .keys()
            .filter_map(|key| match key {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                serde_yaml::Value::Bool(b) => Some(b.to_string()),
                other => {
                    log::warn!("Ignoring non-scalar VM name in settings: {:?}", other);
                    None
                }
            })
            .collect()
    }
}

// --- PROCESS MODELS ---

/// A literal program + argument vector. It is never handed to a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path, resolved through `PATH` by the OS.
    pub program: String,
    /// Arguments, passed as-is.
    pub args: Vec<String>,
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// An invocation of `program` with no arguments and no timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bounds the run time of the child.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for Invocation {
    /// Renders the invocation as a copy-pasteable, shell-quoted line. Used for logs only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words) {
            Ok(line) => f.write_str(&line),
            // Arguments containing NUL bytes cannot be quoted; show them raw.
            Err(_) => write!(f, "{} {}", self.program, self.args.join(" ")),
        }
    }
}

// --- RUN REQUEST MODELS ---

/// The `--ursula-*` and `--vagrant` switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Append `-o ForwardAgent=yes` to the SSH arguments.
    pub forward_agent: bool,
    /// Ask `ansible-playbook` for a syntax check and task listing only.
    pub syntax_test: bool,
    /// Bring up the environment's vagrant machines before the run.
    pub vagrant: bool,
}

/// Everything the orchestrator needs for one top-level run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// The environment directory as typed by the user.
    pub environment: PathBuf,
    /// Playbook path handed to `ansible-playbook`.
    pub playbook: String,
    /// The `ursula` switches.
    pub options: RunOptions,
    /// Arguments forwarded verbatim to `ansible-playbook`.
    pub extra_args: Vec<String>,
}

// --- TOOL CONFIGURATION (ursula.toml) ---

/// The optional `ursula.toml` file. Every field has a default.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    /// The `[ansible]` table.
    pub ansible: AnsibleConfig,
    /// The `[vagrant]` table.
    pub vagrant: VagrantConfig,
}

/// How `ansible-playbook` is invoked.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AnsibleConfig {
    /// Program used for both the version check and the main run.
    pub executable: String,
    /// Remote user passed with `--user`.
    pub user: String,
    /// Passed with `--module-path`.
    pub module_path: String,
    /// Whether to run the `--version` pre-flight at all.
    pub check_version: bool,
    /// The exact version string the check expects.
    pub required_version: String,
    /// Upper bound for `ansible-playbook --version`.
    pub version_timeout_secs: u64,
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            executable: "ansible-playbook".to_string(),
            user: "root".to_string(),
            module_path: "./library".to_string(),
            check_version: true,
            required_version: "1.7.2-bbg".to_string(),
            version_timeout_secs: 30,
        }
    }
}

impl AnsibleConfig {
    /// `version_timeout_secs` as a [`Duration`].
    pub fn version_timeout(&self) -> Duration {
        Duration::from_secs(self.version_timeout_secs)
    }
}

/// How vagrant is driven and where its artifacts are cached.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VagrantConfig {
    /// Program used for `up` and `ssh-config`.
    pub executable: String,
    /// The user `ansible-playbook` logs in as on vagrant machines.
    pub user: String,
    /// Where the SSH descriptor and the settings copy are cached.
    pub cache_dir: PathBuf,
    /// Settings used when the environment has no `vagrant.yml` of its own.
    pub default_settings: PathBuf,
    /// Pause between two `ssh-config` rounds.
    pub poll_interval_secs: u64,
    /// Give up waiting for a usable SSH config after this long.
    pub poll_timeout_secs: u64,
}

impl Default for VagrantConfig {
    fn default() -> Self {
        Self {
            executable: "vagrant".to_string(),
            user: "vagrant".to_string(),
            cache_dir: PathBuf::from(".vagrant"),
            default_settings: PathBuf::from(crate::constants::VAGRANT_SETTINGS_FILENAME),
            poll_interval_secs: 5,
            poll_timeout_secs: 900,
        }
    }
}

impl VagrantConfig {
    /// `poll_interval_secs` as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// `poll_timeout_secs` as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// The cached SSH descriptor path for the given environment.
    pub fn ssh_cache_path(&self, environment: &Environment) -> PathBuf {
        self.cache_dir.join(format!(
            "{}.{}",
            environment.name(),
            crate::constants::SSH_CACHE_EXTENSION
        ))
    }

    /// Where an environment-specific settings file is copied to.
    pub fn settings_cache_path(&self) -> PathBuf {
        self.cache_dir.join(crate::constants::VAGRANT_SETTINGS_FILENAME)
    }
}
