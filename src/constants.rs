// src/constants.rs

/// The inventory file every environment must contain.
pub const INVENTORY_FILENAME: &str = "hosts";

/// Shared variable defaults, looked up one level above the environment directory.
pub const DEFAULTS_RELATIVE_PATH: &str = "../defaults.yml";

/// Optional SSH client configuration shipped with an environment.
pub const SSH_CONFIG_FILENAME: &str = "ssh_config";

/// Per-environment vagrant settings. Also the name of the repository-wide default
/// and of the cached copy.
pub const VAGRANT_SETTINGS_FILENAME: &str = "vagrant.yml";

/// The default location of the tool configuration file (relative to the working directory).
pub const TOOL_CONFIG_FILENAME: &str = "ursula.toml";

/// Extension of the cached SSH descriptor written for each environment.
pub const SSH_CACHE_EXTENSION: &str = "ssh";

/// Every valid `vagrant ssh-config` block starts with this token.
pub const SSH_CONFIG_HEADER: &str = "Host";

/// Directory referenced by the `ControlPath` multiplexing option.
pub const CONTROL_MASTER_DIR: &str = "~/.ssh/controlmasters";

/// Exit code used for every internally raised error.
pub const FAILURE_EXIT_CODE: i32 = 255;

/// Exit code used when the run was interrupted with Ctrl+C.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Names of the environment variables read or written by `ursula`.
pub mod env_vars {
    /// Keeps Python-based tools from buffering their output.
    pub const PYTHON_UNBUFFERED: &str = "PYTHONUNBUFFERED";
    /// Output encoding of Python-based tools.
    pub const PYTHON_IO_ENCODING: &str = "PYTHONIOENCODING";
    /// Colour output even though stdout is a pipe.
    pub const ANSIBLE_FORCE_COLOR: &str = "ANSIBLE_FORCE_COLOR";
    /// Space-separated extra arguments for every ssh connection ansible opens.
    pub const ANSIBLE_SSH_ARGS: &str = "ANSIBLE_SSH_ARGS";
    /// Shared variable defaults for the playbook.
    pub const ANSIBLE_VAR_DEFAULTS_FILE: &str = "ANSIBLE_VAR_DEFAULTS_FILE";
    /// Absolute path of the selected environment.
    pub const URSULA_ENV: &str = "URSULA_ENV";
    /// Vagrant settings file read by the project's `Vagrantfile`.
    pub const SETTINGS_FILE: &str = "SETTINGS_FILE";
    /// Overrides the location of the tool configuration file.
    pub const URSULA_CONFIG: &str = "URSULA_CONFIG";
}
