//! Command-line surface (spec §6): the verbs an operator or an init
//! script uses to control a daemon process, parsed with `clap`'s derive
//! API.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Control verb for a metadata daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start the daemon in the foreground or as configured.
    Start,
    /// Signal a running daemon to shut down cleanly.
    Stop,
    /// Equivalent to `stop` followed by `start`.
    Restart,
    /// Signal a running daemon to re-read its configuration file.
    Reload,
    /// Parse and validate the configuration file without starting anything.
    Test,
    /// Exit 0 if a daemon holding the lockfile is alive, non-zero otherwise.
    Isalive,
    /// Send an immediate termination signal, bypassing clean shutdown.
    Kill,
}

/// Top-level CLI: `mdmaster <command> [--config PATH]`.
#[derive(Debug, Parser)]
#[command(name = "mdmaster", about = "Metadata replication and chunk-placement daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/mdmaster/mdmaster.toml")]
    pub config_path: PathBuf,

    /// Run in the foreground instead of detaching from the controlling terminal.
    #[arg(short = 'f', long)]
    pub foreground: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_custom_config() {
        let cli = Cli::try_parse_from(["mdmaster", "start", "-c", "/tmp/x.toml"]).unwrap();
        assert_eq!(cli.command, Command::Start);
        assert_eq!(cli.config_path, PathBuf::from("/tmp/x.toml"));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["mdmaster", "bogus"]).is_err());
    }
}
