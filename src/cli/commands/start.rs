//! Start command - serve the scoped socket from a detached background process

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::info;

use crate::agent::Upstream;
use crate::cli::args::{ScopeArgs, StartArgs};
use crate::config::parse_duration;
use crate::supervisor::{Supervisor, default_socket_path};

/// Execute the start command
///
/// Prints the socket path on stdout once the background server is ready.
pub async fn execute(
    args: StartArgs,
    config_path: Option<PathBuf>,
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    let mut config = super::load_config(config_path.as_deref())?;
    args.scope.apply(&mut config);
    if let Some(socket) = &args.socket {
        config.socket = Some(socket.to_string_lossy().into_owned());
    }
    let settings = config.resolve(default_socket_path)?;

    // The child's stderr is detached, so report an unreachable upstream here
    Upstream::new(&settings.upstream).check_reachable().await?;

    let ready_timeout = parse_duration(&args.ready_timeout)?;

    // Pin the resolved upstream so the child does not depend on its environment
    let forwarded = ScopeArgs {
        upstream: Some(settings.upstream.clone()),
        ..args.scope
    };
    let mut run_args: Vec<OsString> = forwarded.to_run_args();
    if let Some(path) = &config_path {
        run_args.push("--config".into());
        run_args.push(path.into());
    }
    if verbose {
        run_args.push("--verbose".into());
    }
    if quiet {
        run_args.push("--quiet".into());
    }

    let launched = Supervisor::new()?
        .with_ready_timeout(ready_timeout)
        .launch(&settings.socket_path, &run_args)
        .await
        .context("Failed to start background server")?;

    info!(pid = launched.pid, "Background server started");
    println!("{}", launched.socket_path.display());

    Ok(())
}
