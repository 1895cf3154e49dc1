//! CLI module for authsock-scope
//!
//! This module provides the command-line interface using clap derive macros.

pub mod args;
pub mod commands;
pub mod exit_code;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::{self, LogConfig};
use args::{ConfigArgs, ListArgs, RunArgs, StartArgs};
pub use exit_code::ExitCode;

/// Scoped SSH agent proxy: expose selected keys on a socket that shuts itself down when idle
#[derive(Parser, Debug)]
#[command(name = "authsock-scope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "AUTHSOCK_SCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a scoped socket in the foreground until idle or interrupted
    Run(RunArgs),

    /// Serve a scoped socket in the background and print its path
    Start(StartArgs),

    /// List the upstream agent's keys and which ones would be exposed
    List(ListArgs),

    /// Show or validate configuration
    Config(ConfigArgs),

    /// Show version information
    Version,
}

impl Cli {
    /// Run the selected command
    pub async fn execute(self) -> anyhow::Result<()> {
        let log_config = LogConfig::from_flags(self.verbose, self.quiet);

        // `run` sets up logging itself once it knows the audit log path
        let _guard = match &self.command {
            Commands::Run(_) => None,
            _ => Some(logging::init_with_config(log_config.clone())),
        };

        match self.command {
            Commands::Run(args) => commands::run::execute(args, self.config, log_config).await,
            Commands::Start(args) => {
                commands::start::execute(args, self.config, self.verbose, self.quiet).await
            }
            Commands::List(args) => commands::list::execute(args, self.config).await,
            Commands::Config(args) => commands::config::execute(args, self.config).await,
            Commands::Version => {
                commands::version::print_version(self.verbose);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "authsock-scope",
            "run",
            "--socket",
            "/tmp/s.sock",
            "-f",
            "SHA256:a",
            "--fingerprint",
            "SHA256:b",
            "--idle-timeout",
            "1m",
            "--verbose",
        ]);
        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.socket, Some(PathBuf::from("/tmp/s.sock")));
        assert_eq!(args.scope.fingerprints, vec!["SHA256:a", "SHA256:b"]);
        assert_eq!(args.scope.idle_timeout.as_deref(), Some("1m"));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["authsock-scope", "--verbose", "--quiet", "version"]).is_err());
    }
}
