//! `mdmaster` binary entry point: parses the CLI, loads configuration,
//! and dispatches to the requested control verb (spec §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lizardfs_mdcore::cli::{Cli, Command};
use lizardfs_mdcore::config::Config;
use lizardfs_mdcore::lockfile::Lockfile;

fn lockfile_path(config_path: &PathBuf) -> PathBuf {
    config_path.with_file_name(".mdmaster.lock")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let text = match std::fs::read_to_string(&cli.config_path) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(path = %cli.config_path.display(), error = %e, "cannot read configuration file");
            return ExitCode::FAILURE;
        }
    };
    let config = match Config::parse(&text) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %cli.config_path.display(), %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let lock_path = lockfile_path(&cli.config_path);

    match cli.command {
        Command::Test => {
            tracing::info!(personality = ?config.personality, "configuration parses cleanly");
            ExitCode::SUCCESS
        }
        Command::Isalive => match Lockfile::is_holder_alive(&lock_path) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) | Err(_) => ExitCode::FAILURE,
        },
        Command::Start => {
            let _lock = match Lockfile::acquire(&lock_path) {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(path = %lock_path.display(), %e, "daemon already running");
                    return ExitCode::FAILURE;
                }
            };
            tracing::info!(personality = ?config.personality, "starting");
            run_foreground(config);
            ExitCode::SUCCESS
        }
        Command::Stop | Command::Kill => {
            let pid = match Lockfile::read_pid(&lock_path) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(%e, "no running daemon found");
                    return ExitCode::FAILURE;
                }
            };
            let sig = if cli.command == Command::Kill { libc::SIGKILL } else { libc::SIGTERM };
            let rc = unsafe { libc::kill(pid as i32, sig) };
            if rc == 0 {
                ExitCode::SUCCESS
            } else {
                tracing::error!(pid, "failed to signal process");
                ExitCode::FAILURE
            }
        }
        Command::Reload => match Lockfile::read_pid(&lock_path) {
            Ok(pid) => {
                let rc = unsafe { libc::kill(pid as i32, libc::SIGHUP) };
                if rc == 0 {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                tracing::error!(%e, "no running daemon found");
                ExitCode::FAILURE
            }
        },
        Command::Restart => {
            if let Ok(pid) = Lockfile::read_pid(&lock_path) {
                unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            }
            let _lock = match Lockfile::acquire(&lock_path) {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(%e, "could not acquire lockfile for restart");
                    return ExitCode::FAILURE;
                }
            };
            run_foreground(config);
            ExitCode::SUCCESS
        }
    }
}

/// Runs the cooperative event loop until a termination signal is observed.
/// A full build wires in the changelog writer, namespace, and transport
/// listeners here; this entry point owns only process lifecycle.
fn run_foreground(config: Config) {
    tracing::info!(master_port = config.master_port, "event loop placeholder exiting immediately");
}
