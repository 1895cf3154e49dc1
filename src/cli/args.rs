//! Argument structures for CLI commands

use clap::Args;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::agent::{InFlightPolicy, ListMode, MutationPolicy};
use crate::config::Config;

/// Options shared by `run` and `start`; each one overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Upstream SSH agent socket path [default: $SSH_AUTH_SOCK]
    #[arg(short, long, value_name = "PATH")]
    pub upstream: Option<PathBuf>,

    /// Key to expose: SHA256 fingerprint or OpenSSH public key line (repeatable)
    ///
    /// Each value is one key; repeat the flag for more. Without any, every
    /// upstream key is exposed.
    #[arg(short = 'f', long = "fingerprint", value_name = "KEY")]
    pub fingerprints: Vec<String>,

    /// Shut down after this long without a new connection (e.g. 30s, 5m, 1h)
    #[arg(short = 't', long, value_name = "DURATION")]
    pub idle_timeout: Option<String>,

    /// Capture the key list once at startup instead of on every request
    #[arg(long)]
    pub snapshot: bool,

    /// Refuse add/remove requests instead of forwarding them
    #[arg(long)]
    pub deny_mutations: bool,

    /// Cancel open connections on shutdown instead of letting them finish
    #[arg(long)]
    pub abort_in_flight: bool,

    /// Path to JSONL audit log
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,
}

impl ScopeArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(upstream) = &self.upstream {
            config.upstream = upstream.to_string_lossy().into_owned();
        }
        if !self.fingerprints.is_empty() {
            config.fingerprints = self.fingerprints.clone();
        }
        if let Some(idle_timeout) = &self.idle_timeout {
            config.idle_timeout = idle_timeout.clone();
        }
        if self.snapshot {
            config.list_mode = ListMode::Snapshot;
        }
        if self.deny_mutations {
            config.mutations = MutationPolicy::Deny;
        }
        if self.abort_in_flight {
            config.in_flight = InFlightPolicy::Abort;
        }
        if let Some(log) = &self.log {
            config.log_path = Some(log.to_string_lossy().into_owned());
        }
    }

    /// The same flags as command-line arguments for a child `run`
    pub fn to_run_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(upstream) = &self.upstream {
            args.push("--upstream".into());
            args.push(upstream.into());
        }
        for fingerprint in &self.fingerprints {
            args.push("--fingerprint".into());
            args.push(fingerprint.into());
        }
        if let Some(idle_timeout) = &self.idle_timeout {
            args.push("--idle-timeout".into());
            args.push(idle_timeout.into());
        }
        if self.snapshot {
            args.push("--snapshot".into());
        }
        if self.deny_mutations {
            args.push("--deny-mutations".into());
        }
        if self.abort_in_flight {
            args.push("--abort-in-flight".into());
        }
        if let Some(log) = &self.log {
            args.push("--log".into());
            args.push(log.into());
        }
        args
    }
}

/// Arguments for the `run` command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Scoped socket to create [default: unique path under $XDG_RUNTIME_DIR]
    #[arg(short, long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

/// Arguments for the `start` command
#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    /// Scoped socket to create [default: unique path under $XDG_RUNTIME_DIR]
    #[arg(short, long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// How long to wait for the background server to create its socket
    #[arg(long, default_value = "5s", value_name = "DURATION")]
    pub ready_timeout: String,
}

/// Arguments for the `list` command
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Upstream SSH agent socket path [default: $SSH_AUTH_SOCK]
    #[arg(short, long, value_name = "PATH")]
    pub upstream: Option<PathBuf>,

    /// Mark which keys this allow-list would expose (repeatable, one key per flag)
    #[arg(short = 'f', long = "fingerprint", value_name = "KEY")]
    pub fingerprints: Vec<String>,

    /// Output format
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,
}

impl ListArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(upstream) = &self.upstream {
            config.upstream = upstream.to_string_lossy().into_owned();
        }
        if !self.fingerprints.is_empty() {
            config.fingerprints = self.fingerprints.clone();
        }
    }
}

/// Arguments for the `config` command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Show configuration file search paths
    #[arg(long)]
    pub paths: bool,

    /// Also check that the configuration resolves (paths, durations, fingerprints)
    #[arg(long)]
    pub validate: bool,

    /// Output format
    #[arg(long, default_value = "toml", value_parser = ["toml", "json"])]
    pub format: String,
}
