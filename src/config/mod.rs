//! Configuration for authsock-scope
//!
//! The TOML file and CLI overrides are merged into a `Config`, which is then
//! resolved into the explicit `ScopeSettings` the server runs with. Nothing
//! below the CLI reads the environment.

mod file;

use crate::agent::{FilterOptions, InFlightPolicy, ListMode, MutationPolicy, ServerConfig};
use crate::filter::AllowList;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use file::{ConfigFile, ConfigPath, config_search_paths, find_config_file, load_config, load_config_or_default};

/// Configuration file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the upstream SSH agent socket
    /// Supports environment variable expansion (e.g., $SSH_AUTH_SOCK)
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Path of the scoped socket to create
    /// A unique path under the runtime directory is generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,

    /// Fingerprints (or OpenSSH public key lines) to expose
    /// An empty list exposes every key
    #[serde(default)]
    pub fingerprints: Vec<String>,

    /// Shut down after this long without a new connection ("5m", "30s", ...)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    #[serde(default)]
    pub list_mode: ListMode,

    #[serde(default)]
    pub mutations: MutationPolicy,

    #[serde(default)]
    pub in_flight: InFlightPolicy,

    /// JSONL audit log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: default_upstream(),
            socket: None,
            fingerprints: Vec::new(),
            idle_timeout: default_idle_timeout(),
            list_mode: ListMode::default(),
            mutations: MutationPolicy::default(),
            in_flight: InFlightPolicy::default(),
            log_path: None,
        }
    }
}

fn default_upstream() -> String {
    "$SSH_AUTH_SOCK".to_string()
}

fn default_idle_timeout() -> String {
    "5m".to_string()
}

impl Config {
    /// Expand paths, parse durations and fingerprints.
    ///
    /// `default_socket` supplies the socket path when none is configured.
    pub fn resolve(&self, default_socket: impl FnOnce() -> PathBuf) -> crate::Result<ScopeSettings> {
        let upstream = expand_path(&self.upstream).map_err(|e| {
            crate::Error::UpstreamNotAvailable(format!(
                "cannot resolve upstream socket '{}': {}",
                self.upstream, e
            ))
        })?;
        let socket_path = match &self.socket {
            Some(socket) => PathBuf::from(expand_path(socket)?),
            None => default_socket(),
        };
        let log_path = self
            .log_path
            .as_ref()
            .map(|p| expand_path(p))
            .transpose()?
            .map(PathBuf::from);

        let idle_timeout = parse_duration(&self.idle_timeout)?;
        if idle_timeout.is_zero() {
            return Err(crate::Error::Config(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(ScopeSettings {
            upstream: PathBuf::from(upstream),
            socket_path,
            allow_list: AllowList::new(&self.fingerprints)?,
            filter: FilterOptions {
                list_mode: self.list_mode,
                mutations: self.mutations,
            },
            server: ServerConfig {
                idle_timeout,
                in_flight: self.in_flight,
            },
            log_path,
        })
    }
}

/// Everything a scoped server needs, fully resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSettings {
    pub upstream: PathBuf,
    pub socket_path: PathBuf,
    pub allow_list: AllowList,
    pub filter: FilterOptions,
    pub server: ServerConfig,
    pub log_path: Option<PathBuf>,
}

/// Expand environment variables and tilde in a path string
pub fn expand_path(path: &str) -> crate::Result<String> {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .map_err(|e| crate::Error::Config(format!("Failed to expand path '{}': {}", path, e)))
}

/// Parse a duration string like "1h", "30m", "10s", "1d"
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::Config("Empty duration string".to_string()));
    }

    let (num_str, unit) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, "s"));

    let num: u64 = num_str.trim().parse().map_err(|e| {
        crate::Error::Config(format!("Invalid duration number '{}': {}", num_str, e))
    })?;

    let multiplier: u64 = match unit.to_lowercase().as_str() {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 60 * 60,
        "d" | "day" | "days" => 60 * 60 * 24,
        "w" | "week" | "weeks" => 60 * 60 * 24 * 7,
        _ => {
            return Err(crate::Error::Config(format!(
                "Unknown duration unit '{}' in '{}'",
                unit, s
            )));
        }
    };

    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| crate::Error::Config(format!("Duration '{}' is too large", s)))?;
    Ok(Duration::from_secs(seconds))
}
