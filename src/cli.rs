// src/cli.rs

use crate::models::{RunOptions, RunRequest};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Flags owned by `ursula`. Everything else is meant for `ansible-playbook`.
const URSULA_FLAGS: &[&str] = &[
    "--ursula-forward",
    "--ursula-test",
    "--ursula-debug",
    "--vagrant",
    "-h",
    "--help",
    "-V",
    "--version",
];

/// ursula: a CLI wrapper for ansible.
///
/// Resolves an environment directory (inventory, defaults, SSH config and vagrant
/// settings) into an `ansible-playbook` run. Any argument ursula does not recognise is
/// passed to `ansible-playbook` unchanged.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The environment you want to use.
    pub environment: PathBuf,

    /// The playbook to run.
    pub playbook: String,

    /// Forward the local SSH agent to the managed hosts.
    #[arg(long)]
    pub ursula_forward: bool,

    /// Test syntax for the playbook instead of running it.
    #[arg(long)]
    pub ursula_test: bool,

    /// Run this tool in debug mode.
    #[arg(long)]
    pub ursula_debug: bool,

    /// Provision the environment in vagrant first.
    #[arg(long)]
    pub vagrant: bool,

    /// Arguments passed through to ansible-playbook.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub passthrough: Vec<String>,
}

impl Cli {
    /// Parses the process arguments. `ursula`'s own flags may appear anywhere on the line.
    pub fn parse_with_passthrough() -> Self {
        Self::parse_from(hoist_known_flags(std::env::args_os()))
    }

    /// Converts the parsed line into the orchestrator's input.
    pub fn into_request(self) -> RunRequest {
        RunRequest {
            environment: self.environment,
            playbook: self.playbook,
            options: RunOptions {
                forward_agent: self.ursula_forward,
                syntax_test: self.ursula_test,
                vagrant: self.vagrant,
            },
            extra_args: self.passthrough,
        }
    }
}

/// Number of positionals (`environment`, `playbook`) that precede the pass-through tail.
const POSITIONAL_COUNT: usize = 2;

/// Reorders the raw arguments into the shape clap expects.
///
/// `ursula`'s own flags move to the front so clap sees them wherever they were typed.
/// Unknown options met before both positionals move behind them, into the pass-through
/// tail. The binary name stays first and pass-through arguments keep their relative
/// order. Nothing after a literal `--` is touched.
pub fn hoist_known_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut hoisted: Vec<OsString> = args.next().into_iter().collect();
    let mut leading = Vec::new();
    let mut rest = Vec::new();
    let mut positionals = 0;
    let mut after_separator = false;

    for arg in args {
        if after_separator {
            rest.push(arg);
            continue;
        }
        let text = arg.to_str();
        if text.is_some_and(|s| URSULA_FLAGS.contains(&s)) {
            hoisted.push(arg);
        } else if arg == "--" {
            after_separator = true;
            rest.push(arg);
        } else if positionals < POSITIONAL_COUNT {
            if text.is_some_and(|s| s.len() > 1 && s.starts_with('-')) {
                leading.push(arg);
            } else {
                positionals += 1;
                rest.push(arg);
                if positionals == POSITIONAL_COUNT {
                    rest.append(&mut leading);
                }
            }
        } else {
            rest.push(arg);
        }
    }
    hoisted.extend(rest);
    hoisted.extend(leading);
    hoisted
}
