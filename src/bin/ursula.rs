// EN: src/bin/ursula.rs

use anyhow::Result;
use colored::*;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use ursula::{
    CancellationToken,
    cli::Cli,
    core::{
        config_loader,
        orchestrator::{self, Orchestrator},
        process_env,
    },
    system::executor::SystemRunner,
};

/// The main entry point of the `ursula` application.
/// It sets up logging and Ctrl+C handling, runs the orchestrator and maps the outcome
/// to a process exit code.
fn main() {
    let cli = Cli::parse_with_passthrough();
    init_logger(cli.ursula_debug);

    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));
    let handler_token = cancellation_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_token.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Could not install the Ctrl+C handler: {}", e);
    }

    match run_cli(cli, &cancellation_token) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if orchestrator::is_cancellation(&e, &cancellation_token) {
                eprintln!("\n{}", "Operation cancelled.".yellow());
            } else {
                log::error!("{:#}", e);
            }
            std::process::exit(orchestrator::exit_code_for(&e, &cancellation_token));
        }
    }
}

fn run_cli(cli: Cli, cancellation_token: &CancellationToken) -> Result<i32> {
    log::debug!("CLI args parsed: {:?}", cli);
    let config = config_loader::load()?;
    process_env::ensure_control_master_dir();

    let runner = SystemRunner::new(cancellation_token.clone());
    let orchestrator = Orchestrator::new(&runner, &config, cancellation_token);
    orchestrator.run(&cli.into_request(), process_env::ProcessEnv::inherit())
}

/// `LEVEL: message` lines on stderr. `--ursula-debug` lowers the level to debug;
/// `RUST_LOG` still wins when set.
fn init_logger(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let level = match record.level() {
                log::Level::Error => "ERROR".red().bold(),
                log::Level::Warn => "WARNING".yellow().bold(),
                log::Level::Info => "INFO".normal(),
                log::Level::Debug => "DEBUG".dimmed(),
                log::Level::Trace => "TRACE".dimmed(),
            };
            writeln!(buf, "{}: {}", level, record.args())
        })
        .init();
}
