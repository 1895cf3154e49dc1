//! Logging for authsock-scope
//!
//! Human-readable tracing output goes to stderr. Audit events (sign decisions,
//! filtered keys, connections) can additionally be appended to a JSONL file.

pub mod jsonl;

pub use jsonl::{Decision, JsonlWriter, LogEvent, LogEventKind};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Verbosity level adjustment: -1 for quiet, 0 for normal, +1 for verbose
    pub verbosity: i8,
    /// Optional path to the JSONL audit log
    pub audit_path: Option<PathBuf>,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the global `--verbose` / `--quiet` flags
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        let verbosity = if quiet {
            -1
        } else if verbose {
            1
        } else {
            0
        };
        Self {
            verbosity,
            audit_path: None,
        }
    }

    pub fn with_audit_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.audit_path = Some(path.as_ref().to_path_buf());
        self
    }

    fn min_level(&self) -> Level {
        match self.verbosity {
            v if v < 0 => Level::WARN,
            0 => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

/// Initialize the logging subsystem.
///
/// `RUST_LOG` overrides the level chosen by the flags. Calling this twice
/// keeps the first subscriber.
pub fn init_with_config(config: LogConfig) -> LogGuard {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.min_level().into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a global tracing subscriber was already set");
    }

    let audit = config.audit_path.as_ref().and_then(|path| {
        JsonlWriter::new(path)
            .map_err(|e| {
                tracing::warn!(path = %path.display(), "Failed to open audit log: {}", e);
            })
            .ok()
            .map(Arc::new)
    });

    LogGuard { audit }
}

/// Keeps logging resources alive; the audit log is flushed when dropped
#[must_use = "LogGuard must be kept alive for logging to work"]
pub struct LogGuard {
    audit: Option<Arc<JsonlWriter>>,
}

impl LogGuard {
    /// Shared handle to the audit log, if one is configured
    pub fn audit_log(&self) -> Option<Arc<JsonlWriter>> {
        self.audit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_levels() {
        assert_eq!(LogConfig::new().min_level(), Level::INFO);
        assert_eq!(LogConfig::from_flags(true, false).min_level(), Level::DEBUG);
        assert_eq!(LogConfig::from_flags(false, true).min_level(), Level::WARN);
        // quiet wins over verbose
        assert_eq!(LogConfig::from_flags(true, true).min_level(), Level::WARN);
    }

    #[test]
    fn test_log_config_audit_path() {
        let config = LogConfig::new().with_audit_path("/tmp/audit.jsonl");
        assert_eq!(config.audit_path, Some(PathBuf::from("/tmp/audit.jsonl")));
    }
}
