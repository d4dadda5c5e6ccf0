//! `robokit` – command line front end.
//!
//! ```text
//! robokit run <robot.toml>        start the robot and blink its leds until Ctrl-C
//! robokit snapshot <robot.toml>   start the robot, print its JSON view, disconnect
//! robokit check <robot.toml>      assemble the robot without touching hardware
//! ```
//!
//! Set `ROBOKIT_LOG_FORMAT=json` for newline-delimited JSON logs.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use tokio::sync::watch;
use tracing::warn;

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(PathBuf),
    Snapshot(PathBuf),
    Check(PathBuf),
    Help,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut args = args.into_iter();
    let Some(verb) = args.next() else {
        return Ok(Command::Help);
    };
    let mut config = || {
        args.next()
            .map(PathBuf::from)
            .ok_or_else(|| format!("'{verb}' needs a robot config path"))
    };
    match verb.as_str() {
        "run" => config().map(Command::Run),
        "snapshot" => config().map(Command::Snapshot),
        "check" => config().map(Command::Check),
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn main() -> ExitCode {
    let _guard = robokit_runtime::telemetry::init_tracing("robokit");

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::from(2);
        }
    };

    print_banner();

    // Ctrl-C flips the shutdown flag; the running command disconnects the
    // robot and returns.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – disconnecting …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(commands::execute(command, shutdown_rx)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!("  {} {}", "robokit".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Concurrent robot supervisor");
    println!();
}

fn print_usage() {
    println!("{}", "Usage:".bold());
    println!("  robokit run <robot.toml>");
    println!("  robokit snapshot <robot.toml>");
    println!("  robokit check <robot.toml>");
}
