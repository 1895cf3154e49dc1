//! Run command - serve the scoped socket in the foreground

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::agent::{FilteringAgent, Server, ShutdownReason, Upstream};
use crate::cli::args::RunArgs;
use crate::config::ScopeSettings;
use crate::logging::{self, JsonlWriter, LogConfig};
use crate::supervisor::default_socket_path;

/// Execute the run command
pub async fn execute(args: RunArgs, config_path: Option<PathBuf>, log_config: LogConfig) -> Result<()> {
    let mut config = super::load_config(config_path.as_deref())?;
    args.scope.apply(&mut config);
    if let Some(socket) = &args.socket {
        config.socket = Some(socket.to_string_lossy().into_owned());
    }
    let settings = config.resolve(default_socket_path)?;

    let log_config = match &settings.log_path {
        Some(path) => log_config.with_audit_path(path),
        None => log_config,
    };
    let guard = logging::init_with_config(log_config);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    serve(settings, guard.audit_log(), stop_rx).await?;
    Ok(())
}

/// Connect the upstream, build the filter and serve until idle or stopped
pub async fn serve(
    settings: ScopeSettings,
    audit: Option<Arc<JsonlWriter>>,
    stop: watch::Receiver<bool>,
) -> crate::Result<ShutdownReason> {
    let upstream = Upstream::new(&settings.upstream);
    upstream.check_reachable().await?;

    info!(
        upstream = %settings.upstream.display(),
        socket = %settings.socket_path.display(),
        allowed = settings.allow_list.len(),
        "Starting authsock-scope"
    );

    let mut agent =
        FilteringAgent::new(Arc::new(upstream), settings.allow_list, settings.filter).await?;
    if let Some(audit) = &audit {
        agent = agent.with_audit_log(Arc::clone(audit));
    }

    let mut server = Server::new(&settings.socket_path, Arc::new(agent)).with_config(settings.server);
    if let Some(audit) = audit {
        server = server.with_audit_log(audit);
    }

    let reason = server.listen_until(stop).await?;
    info!(%reason, "Shutdown complete");
    Ok(reason)
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, stopping"),
        () = terminate => info!("Received SIGTERM, stopping"),
    }
}
