// src/core/orchestrator.rs

use crate::{
    CancellationToken,
    constants::{FAILURE_EXIT_CODE, INTERRUPTED_EXIT_CODE, env_vars},
    core::{commons, environment, process_env::ProcessEnv},
    models::{RunRequest, ToolConfig},
    system::{
        ansible,
        executor::{ExecutionError, ProcessRunner},
        vagrant::{ProvisionError, ProvisionOutcome, VagrantProvisioner},
    },
};
use anyhow::{Context, Result};
use colored::*;

/// Turns a [`RunRequest`] into tool invocations and runs them in order.
///
/// Every step depends on the previous one succeeding. The only state that flows between
/// steps is the [`ProcessEnv`] owned by [`Orchestrator::run`] and the list of extra
/// arguments for the final `ansible-playbook` call.
pub struct Orchestrator<'a> {
    runner: &'a dyn ProcessRunner,
    config: &'a ToolConfig,
    cancellation_token: &'a CancellationToken,
}

impl std::fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Orchestrator<'a> {
    /// An orchestrator that spawns every tool through `runner`.
    pub fn new(
        runner: &'a dyn ProcessRunner,
        config: &'a ToolConfig,
        cancellation_token: &'a CancellationToken,
    ) -> Self {
        Self {
            runner,
            config,
            cancellation_token,
        }
    }

    /// Runs one request and returns the exit code of `ansible-playbook`.
    ///
    /// `base_env` is the environment the run starts from, normally
    /// [`ProcessEnv::inherit`]. Errors are returned as-is; the binary decides the exit code.
    pub fn run(&self, request: &RunRequest, base_env: ProcessEnv) -> Result<i32> {
        log::debug!("Run request: {:?}", request);
        let mut env = base_env;

        if self.config.ansible.check_version {
            ansible::check_version(self.runner, &env, &self.config.ansible)?;
        }

        // 1. Defaults every tool gets.
        env.apply_defaults();

        // 2. Nothing is spawned for an invalid environment.
        let environment = environment::resolve(&request.environment)?;

        // 3. Environment-derived overrides.
        env.set(
            env_vars::URSULA_ENV,
            &environment.absolute_root.to_string_lossy(),
        );
        if let Some(defaults) = &environment.defaults_file {
            env.append(
                env_vars::ANSIBLE_VAR_DEFAULTS_FILE,
                &defaults.to_string_lossy(),
            );
        }
        if let Some(ssh_config) = &environment.ssh_config {
            env.append(
                env_vars::ANSIBLE_SSH_ARGS,
                &format!("-F {}", ssh_config.display()),
            );
        }

        // 4. Agent forwarding.
        if request.options.forward_agent {
            env.append(env_vars::ANSIBLE_SSH_ARGS, "-o ForwardAgent=yes");
        }

        let mut extra_args = request.extra_args.clone();

        // 5. Syntax test.
        if request.options.syntax_test {
            extra_args.extend(["--syntax-check".to_string(), "--list-tasks".to_string()]);
        }

        // 6. Vagrant machines must be up before the main run.
        if request.options.vagrant {
            extra_args.extend([
                "-s".to_string(),
                "-u".to_string(),
                self.config.vagrant.user.clone(),
            ]);
            let mut provisioner =
                VagrantProvisioner::new(self.runner, &self.config.vagrant, self.cancellation_token);
            let outcome = provisioner
                .provision(&environment, &mut env)
                .context("Vagrant provisioning failed")?;
            print_vagrant_banner(&outcome);
        }

        // 7. The main run.
        let invocation = ansible::playbook_invocation(
            &self.config.ansible,
            &environment,
            &request.playbook,
            &extra_args,
        );
        log::info!("Running: {}", invocation);
        let code = self
            .runner
            .run(&invocation, &env, &mut |line| println!("{}", line))
            .context("Failed to run ansible-playbook")?;
        if code != 0 {
            log::debug!("ansible-playbook exited with code {}", code);
        }
        Ok(code)
    }
}

/// Maps a failed run to the process exit code.
///
/// Cancellation exits with 130. A failed `vagrant up` or `vagrant ssh-config` exits with
/// vagrant's own code. Everything else uses the fixed failure code.
pub fn exit_code_for(error: &anyhow::Error, cancellation_token: &CancellationToken) -> i32 {
    if is_cancellation(error, cancellation_token) {
        return INTERRUPTED_EXIT_CODE;
    }
    error
        .downcast_ref::<ProvisionError>()
        .and_then(ProvisionError::tool_exit_code)
        .filter(|code| *code != 0)
        .unwrap_or(FAILURE_EXIT_CODE)
}

/// True when the run stopped because the user asked it to.
pub fn is_cancellation(error: &anyhow::Error, cancellation_token: &CancellationToken) -> bool {
    commons::is_cancelled(cancellation_token)
        || matches!(
            error.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Cancelled)
        )
        || matches!(
            error.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Cancelled | ProvisionError::Execution(ExecutionError::Cancelled))
        )
}

fn print_vagrant_banner(outcome: &ProvisionOutcome) {
    let rule = "*".repeat(50);
    println!("{}", rule.dimmed());
    println!("{}", "Ursula <3 Vagrant".magenta().bold());
    println!("To interact with your environment via Vagrant set:");
    println!(
        "{}",
        format!("$ export SETTINGS_FILE={}", outcome.settings_file.display()).cyan()
    );
    println!("{}", rule.dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::environment::EnvironmentError,
        models::{Invocation, RunOptions},
        system::{executor::ExecutionError, vagrant::ProvisionError},
    };
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    /// Records each invocation together with the environment it was given.
    struct RecordingRunner {
        responses: RefCell<VecDeque<(&'static str, i32)>>,
        calls: RefCell<Vec<(Invocation, ProcessEnv)>>,
    }

    impl RecordingRunner {
        fn new(responses: &[(&'static str, i32)]) -> Self {
            Self {
                responses: RefCell::new(responses.iter().copied().collect()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run(
            &self,
            invocation: &Invocation,
            env: &ProcessEnv,
            on_line: &mut dyn FnMut(&str),
        ) -> Result<i32, ExecutionError> {
            self.calls.borrow_mut().push((invocation.clone(), env.clone()));
            let (output, code) = self.responses.borrow_mut().pop_front().unwrap_or(("", 0));
            for line in output.lines() {
                on_line(line);
            }
            Ok(code)
        }
    }

    struct Workspace {
        dir: TempDir,
        config: ToolConfig,
        token: CancellationToken,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = ToolConfig::default();
            config.ansible.check_version = false;
            config.vagrant.cache_dir = dir.path().join(".vagrant");
            config.vagrant.default_settings = dir.path().join("vagrant.yml");
            config.vagrant.poll_interval_secs = 0;
            Self {
                dir,
                config,
                token: Arc::new(AtomicBool::new(false)),
            }
        }

        fn env_dir(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join("env").join(name);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("hosts"), "[all]\nweb01\n").unwrap();
            path
        }

        fn request(&self, env: PathBuf, options: RunOptions, extra: &[&str]) -> RunRequest {
            RunRequest {
                environment: env,
                playbook: "site.yml".to_string(),
                options,
                extra_args: extra.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[test]
    fn test_plain_run_invokes_ansible_once() {
        let ws = Workspace::new();
        let env_dir = ws.env_dir("prod");
        let runner = RecordingRunner::new(&[("PLAY RECAP", 2)]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let code = orchestrator
            .run(&ws.request(env_dir.clone(), RunOptions::default(), &[]), ProcessEnv::new())
            .unwrap();
        assert_eq!(code, 2);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        let (invocation, env) = &calls[0];
        assert_eq!(invocation.program, "ansible-playbook");
        assert_eq!(
            invocation.args,
            vec![
                "--inventory-file".to_string(),
                env_dir.join("hosts").to_string_lossy().into_owned(),
                "--user".to_string(),
                "root".to_string(),
                "--module-path".to_string(),
                "./library".to_string(),
                "site.yml".to_string(),
            ]
        );
        assert!(!invocation.args.iter().any(|a| a == "--sudo"));

        assert_eq!(env.get(env_vars::PYTHON_UNBUFFERED), Some("1"));
        assert_eq!(
            env.get(env_vars::URSULA_ENV).map(PathBuf::from),
            Some(env_dir.clone())
        );
        assert!(env.get(env_vars::ANSIBLE_VAR_DEFAULTS_FILE).is_none());
        assert!(env.get(env_vars::SETTINGS_FILE).is_none());
    }

    #[test]
    fn test_missing_inventory_spawns_nothing() {
        let ws = Workspace::new();
        let env_dir = ws.dir.path().join("env").join("empty");
        fs::create_dir_all(&env_dir).unwrap();
        let runner = RecordingRunner::new(&[]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let err = orchestrator
            .run(&ws.request(env_dir, RunOptions::default(), &[]), ProcessEnv::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvironmentError>(),
            Some(EnvironmentError::InventoryMissing(_))
        ));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_syntax_test_appends_flags_only() {
        let ws = Workspace::new();
        let env_dir = ws.env_dir("prod");
        let runner = RecordingRunner::new(&[]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let plain = ws.request(env_dir.clone(), RunOptions::default(), &["--tags", "web"]);
        orchestrator.run(&plain, ProcessEnv::new()).unwrap();

        let options = RunOptions {
            syntax_test: true,
            ..RunOptions::default()
        };
        let tested = ws.request(env_dir, options, &["--tags", "web"]);
        orchestrator.run(&tested, ProcessEnv::new()).unwrap();

        let calls = runner.calls.borrow();
        let (plain_call, plain_env) = &calls[0];
        let (test_call, test_env) = &calls[1];

        let mut expected = plain_call.args.clone();
        expected.extend(["--syntax-check".to_string(), "--list-tasks".to_string()]);
        assert_eq!(test_call.args, expected);
        assert_eq!(plain_env, test_env);
    }

    #[test]
    fn test_environment_overrides_and_forwarding() {
        let ws = Workspace::new();
        let env_dir = ws.env_dir("staging");
        fs::write(env_dir.join("ssh_config"), "Host *\n").unwrap();
        fs::write(env_dir.join("../defaults.yml"), "a: 1\n").unwrap();
        let runner = RecordingRunner::new(&[]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let options = RunOptions {
            forward_agent: true,
            ..RunOptions::default()
        };
        orchestrator
            .run(&ws.request(env_dir.clone(), options, &[]), ProcessEnv::new())
            .unwrap();

        let calls = runner.calls.borrow();
        let (_, env) = &calls[0];
        let ssh_args = env.get(env_vars::ANSIBLE_SSH_ARGS).unwrap();
        let expected_tail = format!(
            "-o ControlPersist=300 -F {} -o ForwardAgent=yes",
            env_dir.join("ssh_config").display()
        );
        assert!(ssh_args.starts_with("-o ControlMaster=auto "));
        assert!(ssh_args.ends_with(&expected_tail), "got: {ssh_args}");
        assert_eq!(
            env.get(env_vars::ANSIBLE_VAR_DEFAULTS_FILE).map(PathBuf::from),
            Some(env_dir.join("../defaults.yml"))
        );
    }

    #[test]
    fn test_vagrant_run_provisions_first() {
        let ws = Workspace::new();
        let env_dir = ws.env_dir("dev");
        fs::write(env_dir.join("vagrant.yml"), "vms:\n  allinone: {}\n").unwrap();
        let runner = RecordingRunner::new(&[
            ("Bringing machine 'allinone' up...", 0),
            ("Host allinone\n  Port 2222", 0),
            ("PLAY RECAP", 0),
        ]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let options = RunOptions {
            vagrant: true,
            ..RunOptions::default()
        };
        let code = orchestrator
            .run(&ws.request(env_dir.clone(), options, &["-v"]), ProcessEnv::new())
            .unwrap();
        assert_eq!(code, 0);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0.program, "vagrant");
        assert_eq!(calls[1].0.args, vec!["ssh-config", "allinone"]);

        let (ansible_call, env) = &calls[2];
        assert_eq!(ansible_call.program, "ansible-playbook");
        assert!(ansible_call.args.ends_with(&[
            "site.yml".to_string(),
            "-v".to_string(),
            "-s".to_string(),
            "-u".to_string(),
            "vagrant".to_string(),
        ]));
        let ssh_cache = ws.dir.path().join(".vagrant").join("dev.ssh");
        assert!(
            env.get(env_vars::ANSIBLE_SSH_ARGS)
                .unwrap()
                .ends_with(&format!("-F {}", ssh_cache.display()))
        );
        assert_eq!(
            env.get(env_vars::SETTINGS_FILE).map(PathBuf::from),
            Some(env_dir.join("vagrant.yml"))
        );
    }

    #[test]
    fn test_vagrant_bringup_failure_skips_ansible() {
        let ws = Workspace::new();
        let env_dir = ws.env_dir("dev");
        fs::write(ws.dir.path().join("vagrant.yml"), "vms:\n  allinone: {}\n").unwrap();
        let runner = RecordingRunner::new(&[("boom", 1)]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let options = RunOptions {
            vagrant: true,
            ..RunOptions::default()
        };
        let err = orchestrator
            .run(&ws.request(env_dir, options, &[]), ProcessEnv::new())
            .unwrap_err();

        let provision_err = err.downcast_ref::<ProvisionError>().unwrap();
        assert_eq!(provision_err.tool_exit_code(), Some(1));
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.args[0], "up");
    }

    #[test]
    fn test_version_check_runs_before_everything() {
        let mut ws = Workspace::new();
        ws.config.ansible.check_version = true;
        let env_dir = ws.env_dir("prod");
        let runner = RecordingRunner::new(&[("ansible-playbook 2.0.0", 0)]);
        let orchestrator = Orchestrator::new(&runner, &ws.config, &ws.token);

        let err = orchestrator
            .run(&ws.request(env_dir, RunOptions::default(), &[]), ProcessEnv::new())
            .unwrap_err();
        assert!(err.to_string().contains("1.7.2-bbg"));

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.args, vec!["--version"]);
        // The check sees the environment before the defaults are applied.
        assert!(calls[0].1.get(env_vars::ANSIBLE_SSH_ARGS).is_none());
    }

    #[test]
    fn test_exit_code_for_vagrant_failures_is_the_tool_code() {
        let token: CancellationToken = Arc::new(AtomicBool::new(false));
        let bringup = anyhow::Error::new(ProvisionError::VmBringupFailed {
            command: "vagrant up --no-provision allinone".to_string(),
            code: 3,
        })
        .context("Vagrant provisioning failed");
        assert_eq!(exit_code_for(&bringup, &token), 3);

        let query = anyhow::Error::new(ProvisionError::SshConfigQueryFailed {
            vm: "allinone".to_string(),
            code: 7,
        });
        assert_eq!(exit_code_for(&query, &token), 7);
    }

    #[test]
    fn test_exit_code_for_internal_errors_is_the_failure_code() {
        let token: CancellationToken = Arc::new(AtomicBool::new(false));
        let missing = anyhow::Error::new(EnvironmentError::InventoryMissing(PathBuf::from(
            "env/prod/hosts",
        )));
        assert_eq!(exit_code_for(&missing, &token), FAILURE_EXIT_CODE);

        let timeout = anyhow::Error::new(ProvisionError::Timeout {
            elapsed: std::time::Duration::from_secs(900),
            attempts: 180,
        });
        assert_eq!(exit_code_for(&timeout, &token), FAILURE_EXIT_CODE);
    }

    #[test]
    fn test_exit_code_for_cancellation() {
        let token: CancellationToken = Arc::new(AtomicBool::new(false));
        let cancelled = anyhow::Error::new(ProvisionError::Cancelled);
        assert_eq!(exit_code_for(&cancelled, &token), INTERRUPTED_EXIT_CODE);

        let killed =
            anyhow::Error::new(ExecutionError::Cancelled).context("Failed to run ansible-playbook");
        assert_eq!(exit_code_for(&killed, &token), INTERRUPTED_EXIT_CODE);

        token.store(true, std::sync::atomic::Ordering::SeqCst);
        let missing = anyhow::Error::new(EnvironmentError::NotFound(PathBuf::from("env/x")));
        assert_eq!(exit_code_for(&missing, &token), INTERRUPTED_EXIT_CODE);
    }
}
