// EN: src/system/executor.rs

use crate::{
    CancellationToken,
    core::{commons, process_env::ProcessEnv},
    models::Invocation,
};
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while spawning or supervising a child process.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command '{command}' could not be executed: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Command '{command}' exited with a non-zero error code ({code}).")]
    NonZeroExit { command: String, code: i32 },
    #[error("Command '{command}' did not finish within {} seconds.", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

/// Spawns external tools.
///
/// Implementations receive a literal argument vector and the complete environment for
/// the child, and hand every output line to `on_line` as soon as it is read. The
/// returned value is the child's exit code.
pub trait ProcessRunner {
    /// Runs `invocation` to completion and returns its exit code.
    fn run(
        &self,
        invocation: &Invocation,
        env: &ProcessEnv,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<i32, ExecutionError>;
}

/// Runs a command, collects its merged output and fails on a non-zero exit.
/// Intended for short queries such as `--version`.
pub fn capture_output(
    runner: &dyn ProcessRunner,
    invocation: &Invocation,
    env: &ProcessEnv,
) -> Result<String, ExecutionError> {
    let mut output = String::new();
    let code = runner.run(invocation, env, &mut |line| {
        output.push_str(line);
        output.push('\n');
    })?;
    if code != 0 {
        return Err(ExecutionError::NonZeroExit {
            command: invocation.to_string(),
            code,
        });
    }
    Ok(output)
}

/// The production runner: real child processes, stdout and stderr merged.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    cancellation_token: CancellationToken,
}

impl SystemRunner {
    /// A runner that kills its children once `cancellation_token` is set.
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self { cancellation_token }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        env: &ProcessEnv,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<i32, ExecutionError> {
        let command_line = invocation.to_string();
        log::debug!("Running command: {}", command_line);
        if log::log_enabled!(log::Level::Trace) {
            for (key, value) in env.iter() {
                log::trace!("  env {}={}", key.to_string_lossy(), value.to_string_lossy());
            }
        }

        // stdout and stderr share one pipe so lines keep the order the child wrote them in.
        let (reader, writer) = io::pipe().map_err(|e| ExecutionError::Io {
            command: command_line.clone(),
            source: e,
        })?;
        let stderr_writer = writer.try_clone().map_err(|e| ExecutionError::Io {
            command: command_line.clone(),
            source: e,
        })?;

        let mut command = StdCommand::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::inherit())
            .stdout(writer)
            .stderr(stderr_writer);
        let spawned = command.spawn();
        // The command owns the parent's write ends; the reader only sees EOF once they are gone.
        drop(command);
        let mut child = spawned.map_err(|e| ExecutionError::Spawn {
            command: command_line.clone(),
            source: e,
        })?;

        let (tx, rx) = mpsc::channel::<String>();
        let output_reader = spawn_line_reader(reader, tx);

        let started = Instant::now();
        loop {
            match rx.recv_timeout(commons::WAIT_TICK) {
                Ok(line) => on_line(&line),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if commons::is_cancelled(&self.cancellation_token) {
                log::debug!(
                    "Cancellation requested, killing child process (PID: {})...",
                    child.id()
                );
                kill_and_reap(&mut child);
                return Err(ExecutionError::Cancelled);
            }
            if let Some(timeout) = invocation.timeout
                && started.elapsed() > timeout
            {
                log::warn!("'{}' timed out after {:?}, killing it.", command_line, timeout);
                kill_and_reap(&mut child);
                return Err(ExecutionError::TimedOut {
                    command: command_line,
                    timeout,
                });
            }
        }

        // Every write end is closed; the reader is done.
        if output_reader.join().is_err() {
            log::warn!("The output reader thread for '{}' panicked.", command_line);
        }

        let status = child.wait().map_err(|e| ExecutionError::Io {
            command: command_line.clone(),
            source: e,
        })?;
        let code = exit_code(status);
        log::debug!("Command '{}' exited with code {}", command_line, code);
        Ok(code)
    }
}

fn spawn_line_reader<R>(stream: R, tx: Sender<String>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        // The receiving side gave up (cancellation or timeout).
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Stopped reading child output: {}", e);
                    break;
                }
            }
        }
    })
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill child process {}: {}", child.id(), e);
    }
    child.wait().ok();
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(crate::constants::FAILURE_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(crate::constants::FAILURE_EXIT_CODE)
}
