//! Command implementations for authsock-scope CLI

pub mod config;
pub mod list;
pub mod run;
pub mod start;
pub mod version;

use std::path::Path;

use crate::config::{Config, load_config_or_default};

/// Read the explicit config file, or the first one in the search paths
fn load_config(path: Option<&Path>) -> crate::Result<Config> {
    let file = load_config_or_default(path)?;
    match &file.path {
        Some(path) => tracing::debug!(path = %path.display(), "Using configuration file"),
        None => tracing::debug!("No configuration file, using defaults"),
    }
    Ok(file.config)
}
