// EN: src/system/vagrant.rs

use crate::{
    CancellationToken,
    constants::{SSH_CONFIG_HEADER, env_vars},
    core::{commons, process_env::ProcessEnv},
    models::{Environment, Invocation, VagrantConfig, VagrantSettings},
    system::executor::{ExecutionError, ProcessRunner},
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Everything that can stop the vagrant machines from becoming reachable.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("No vagrant settings found: neither '{environment}' nor '{default}' exists")]
    SettingsMissing { environment: PathBuf, default: PathBuf },
    #[error("Failed to parse vagrant settings '{path}': {source}")]
    SettingsInvalid {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Vagrant settings '{0}' do not define any VMs under 'vms'")]
    NoVms(PathBuf),
    #[error("Failed to bring up VMs with '{command}' (exit code {code})")]
    VmBringupFailed { command: String, code: i32 },
    #[error("Failed to create SSH config for VM '{vm}' (exit code {code})")]
    SshConfigQueryFailed { vm: String, code: i32 },
    #[error("Timed out after {} seconds ({attempts} attempts) waiting for the vagrant SSH config", .elapsed.as_secs())]
    Timeout { elapsed: Duration, attempts: u32 },
    #[error("Vagrant provisioning was cancelled by the user.")]
    Cancelled,
    #[error("Filesystem error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl ProvisionError {
    /// The exit code of the vagrant command behind this failure, if there was one.
    pub fn tool_exit_code(&self) -> Option<i32> {
        match self {
            Self::VmBringupFailed { code, .. } | Self::SshConfigQueryFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

/// The stages a provisioning run moves through. `Failed` can follow any stage but `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Idle,
    SettingsLoaded,
    VmsStarting,
    VmsUp,
    SshConfigPending,
    SshConfigReady,
    Done,
    Failed,
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How long to wait between SSH config queries and when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between two rounds.
    pub interval: Duration,
    /// Total time budget for the poll.
    pub timeout: Duration,
}

impl From<&VagrantConfig> for PollPolicy {
    fn from(config: &VagrantConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            timeout: config.poll_timeout(),
        }
    }
}

/// What a successful provisioning run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Machines that were brought up, in settings order.
    pub vms: Vec<String>,
    /// The settings file that was used.
    pub settings_file: PathBuf,
    /// Whether `settings_file` came from the environment rather than the repository default.
    pub environment_specific: bool,
    /// The persisted SSH descriptor, now referenced from `ANSIBLE_SSH_ARGS`.
    pub ssh_config_path: PathBuf,
    /// Number of `ssh-config` rounds it took for the descriptor to become valid.
    pub attempts: u32,
}

/// Brings up an environment's vagrant machines and wires their SSH config into the
/// process environment of the main run.
pub struct VagrantProvisioner<'a> {
    runner: &'a dyn ProcessRunner,
    config: &'a VagrantConfig,
    cancellation_token: &'a CancellationToken,
    poll: PollPolicy,
    state: ProvisionState,
}

impl fmt::Debug for VagrantProvisioner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VagrantProvisioner")
            .field("config", &self.config)
            .field("poll", &self.poll)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> VagrantProvisioner<'a> {
    /// A provisioner in the `Idle` state, polling with the bounds from `config`.
    pub fn new(
        runner: &'a dyn ProcessRunner,
        config: &'a VagrantConfig,
        cancellation_token: &'a CancellationToken,
    ) -> Self {
        Self {
            runner,
            config,
            cancellation_token,
            poll: PollPolicy::from(config),
            state: ProvisionState::Idle,
        }
    }

    /// Overrides the poll bounds taken from the config.
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// The stage reached so far.
    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// Runs the whole provisioning sequence.
    ///
    /// On success `env` carries `SETTINGS_FILE` (for environment-specific settings) and a
    /// `-F <ssh config>` fragment in `ANSIBLE_SSH_ARGS`. On failure the state is `Failed`
    /// and machines that were already started are left running.
    pub fn provision(
        &mut self,
        environment: &Environment,
        env: &mut ProcessEnv,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let result = self.provision_inner(environment, env);
        if let Err(e) = &result {
            log::debug!("Provisioning failed in state {}: {}", self.state, e);
            self.transition(ProvisionState::Failed);
        }
        result
    }

    fn provision_inner(
        &mut self,
        environment: &Environment,
        env: &mut ProcessEnv,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let (settings_file, environment_specific, settings) = self.load_settings(environment, env)?;
        let vms = settings.vm_names();
        if vms.is_empty() {
            return Err(ProvisionError::NoVms(settings_file));
        }
        self.transition(ProvisionState::SettingsLoaded);

        self.bring_up(&vms, env)?;

        let (ssh_config, attempts) = self.await_ssh_config(&vms, env)?;

        let ssh_config_path = self.persist_ssh_config(environment, &ssh_config)?;
        env.append(
            env_vars::ANSIBLE_SSH_ARGS,
            &format!("-F {}", ssh_config_path.display()),
        );
        self.transition(ProvisionState::Done);

        Ok(ProvisionOutcome {
            vms,
            settings_file,
            environment_specific,
            ssh_config_path,
            attempts,
        })
    }

    fn transition(&mut self, next: ProvisionState) {
        log::debug!("Vagrant provisioning: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Picks the environment's `vagrant.yml`, falling back to the repository default.
    /// An environment-specific file is exported through `SETTINGS_FILE` and cached.
    fn load_settings(
        &self,
        environment: &Environment,
        env: &mut ProcessEnv,
    ) -> Result<(PathBuf, bool, VagrantSettings), ProvisionError> {
        let (path, environment_specific) = match &environment.vagrant_settings {
            Some(path) => (path.clone(), true),
            None if self.config.default_settings.is_file() => {
                (self.config.default_settings.clone(), false)
            }
            None => {
                return Err(ProvisionError::SettingsMissing {
                    environment: environment
                        .root
                        .join(crate::constants::VAGRANT_SETTINGS_FILENAME),
                    default: self.config.default_settings.clone(),
                });
            }
        };
        log::debug!("Loading vagrant settings from '{}'", path.display());

        let content = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        let settings: VagrantSettings =
            serde_yaml::from_str(&content).map_err(|e| ProvisionError::SettingsInvalid {
                path: path.clone(),
                source: e,
            })?;

        if environment_specific {
            env.set(env_vars::SETTINGS_FILE, &path.to_string_lossy());
            self.ensure_cache_dir()?;
            let cached = self.config.settings_cache_path();
            fs::copy(&path, &cached).map_err(|e| io_error(&cached, e))?;
            log::debug!("Cached vagrant settings at '{}'", cached.display());
        }

        Ok((path, environment_specific, settings))
    }

    /// `vagrant up --no-provision <vms...>`, output streamed to the terminal.
    fn bring_up(&mut self, vms: &[String], env: &ProcessEnv) -> Result<(), ProvisionError> {
        self.transition(ProvisionState::VmsStarting);
        let invocation = Invocation::new(&self.config.executable)
            .arg("up")
            .arg("--no-provision")
            .args(vms.iter().cloned());

        let code = self
            .runner
            .run(&invocation, env, &mut |line| println!("{}", line))?;
        if code != 0 {
            return Err(ProvisionError::VmBringupFailed {
                command: invocation.to_string(),
                code,
            });
        }
        self.transition(ProvisionState::VmsUp);
        Ok(())
    }

    /// Queries `vagrant ssh-config` for every VM until the combined output starts with
    /// the `Host` header.
    ///
    /// A non-zero exit from any query is a hard failure. Only an incomplete (but
    /// successful) answer leads to another round.
    fn await_ssh_config(
        &mut self,
        vms: &[String],
        env: &ProcessEnv,
    ) -> Result<(String, u32), ProvisionError> {
        self.transition(ProvisionState::SshConfigPending);
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if commons::is_cancelled(self.cancellation_token) {
                return Err(ProvisionError::Cancelled);
            }

            attempts += 1;
            let ssh_config = self.query_ssh_config(vms, env)?;
            if ssh_config.starts_with(SSH_CONFIG_HEADER) {
                log::debug!("SSH config ready after {} attempt(s)", attempts);
                self.transition(ProvisionState::SshConfigReady);
                return Ok((ssh_config, attempts));
            }

            let elapsed = started.elapsed();
            if elapsed + self.poll.interval > self.poll.timeout {
                return Err(ProvisionError::Timeout { elapsed, attempts });
            }
            log::info!(
                "SSH config not ready yet, retrying in {} seconds...",
                self.poll.interval.as_secs()
            );
            if !commons::sleep_cancellable(self.poll.interval, self.cancellation_token) {
                return Err(ProvisionError::Cancelled);
            }
        }
    }

    fn query_ssh_config(&self, vms: &[String], env: &ProcessEnv) -> Result<String, ProvisionError> {
        let mut output = String::new();
        for vm in vms {
            let invocation = Invocation::new(&self.config.executable)
                .arg("ssh-config")
                .arg(vm);
            let code = self.runner.run(&invocation, env, &mut |line| {
                output.push_str(line.trim_end());
                output.push('\n');
            })?;
            if code != 0 {
                return Err(ProvisionError::SshConfigQueryFailed {
                    vm: vm.clone(),
                    code,
                });
            }
        }
        Ok(output)
    }

    fn persist_ssh_config(
        &self,
        environment: &Environment,
        ssh_config: &str,
    ) -> Result<PathBuf, ProvisionError> {
        self.ensure_cache_dir()?;
        let path = self.config.ssh_cache_path(environment);
        fs::write(&path, ssh_config).map_err(|e| io_error(&path, e))?;
        log::debug!("Wrote vagrant SSH config to '{}'", path.display());
        Ok(path)
    }

    fn ensure_cache_dir(&self) -> Result<(), ProvisionError> {
        let dir = &self.config.cache_dir;
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ProvisionError {
    ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    }
}
