//! Unix socket server with idle-timeout shutdown
//!
//! The server binds its socket, serves every accepted connection on its own
//! task, and stops once no new connection has arrived for the idle timeout,
//! on an explicit stop, or on an unrecoverable listener error. The socket
//! file is removed on every exit path.

use crate::agent::{Agent, IdleTimer, serve_connection};
use crate::error::{Error, Result};
use crate::logging::{JsonlWriter, LogEvent, LogEventKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after an accept failure caused by resource exhaustion
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

/// What happens to open connections once the server stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightPolicy {
    /// Let them run to completion
    #[default]
    Finish,
    /// Cancel them
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Time without a new connection before the server stops
    pub idle_timeout: Duration,
    pub in_flight: InFlightPolicy,
}

impl ServerConfig {
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            in_flight: InFlightPolicy::default(),
        }
    }
}

/// Why `listen` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    IdleTimeout,
    Stopped,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::IdleTimeout => write!(f, "idle timeout"),
            ShutdownReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// Unix socket server exposing an `Agent`
pub struct Server {
    socket_path: PathBuf,
    agent: Arc<dyn Agent>,
    config: ServerConfig,
    audit: Option<Arc<JsonlWriter>>,
    connection_counter: AtomicU64,
}

impl Server {
    /// Create a server for `socket_path`. Nothing is bound until `listen`.
    pub fn new<P: AsRef<Path>>(socket_path: P, agent: Arc<dyn Agent>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            agent,
            config: ServerConfig::default(),
            audit: None,
            connection_counter: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<JsonlWriter>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn config(&self) -> ServerConfig {
        self.config
    }

    /// Serve until the idle timeout elapses
    pub async fn listen(&self) -> Result<ShutdownReason> {
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.listen_until(stop_rx).await
    }

    /// Serve until the idle timeout elapses or `stop` turns true.
    ///
    /// Dropping the sender also counts as a stop.
    pub async fn listen_until(&self, mut stop: watch::Receiver<bool>) -> Result<ShutdownReason> {
        if *stop.borrow_and_update() {
            return Ok(ShutdownReason::Stopped);
        }

        let (listener, guard) = self.bind()?;
        let socket_name = self.socket_path.display().to_string();
        let timer = IdleTimer::start(self.config.idle_timeout);

        info!(
            path = %socket_name,
            idle_timeout = ?self.config.idle_timeout,
            "Server listening"
        );
        self.record(LogEvent::server_start(socket_name.clone()));

        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        let idle = timer.expired();
        tokio::pin!(idle);

        let outcome = loop {
            tokio::select! {
                // a connection waiting in the backlog beats a simultaneous timer fire
                biased;

                changed = stop.changed() => {
                    if changed.is_ok() && !*stop.borrow() {
                        continue;
                    }
                    info!("Stop requested, shutting down");
                    break Ok(ShutdownReason::Stopped);
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        if !timer.reset().await {
                            break Ok(ShutdownReason::IdleTimeout);
                        }
                        connections.retain(|handle| !handle.is_finished());
                        connections.push(self.spawn_connection(stream, &socket_name));
                    }
                    Err(e) => match classify_accept_error(&e) {
                        AcceptFailure::Transient => {
                            warn!(error = %e, "Transient accept failure");
                        }
                        AcceptFailure::Exhausted => {
                            warn!(error = %e, "Out of resources while accepting, backing off");
                            tokio::time::sleep(EXHAUSTED_BACKOFF).await;
                        }
                        AcceptFailure::Fatal => {
                            error!(error = %e, "Listener failed");
                            self.record(LogEvent::error(format!("accept failed: {}", e)));
                            break Err(Error::Socket(format!("Failed to accept connection: {}", e)));
                        }
                    }
                },

                () = &mut idle => {
                    info!(
                        idle_timeout = ?self.config.idle_timeout,
                        "No new connections within the idle timeout, shutting down"
                    );
                    self.record(
                        LogEvent::new(LogEventKind::IdleTimeout).with_socket_name(socket_name.clone()),
                    );
                    break Ok(ShutdownReason::IdleTimeout);
                }
            }
        };

        drop(listener);
        drop(guard);

        let reason = match &outcome {
            Ok(reason) => reason.to_string(),
            Err(e) => e.to_string(),
        };
        self.record(LogEvent::server_stop(socket_name, reason));

        connections.retain(|handle| !handle.is_finished());
        match self.config.in_flight {
            InFlightPolicy::Finish => {
                if !connections.is_empty() {
                    info!(count = connections.len(), "Waiting for open connections to finish");
                }
                futures::future::join_all(connections).await;
            }
            InFlightPolicy::Abort => {
                if !connections.is_empty() {
                    info!(count = connections.len(), "Aborting open connections");
                }
                for handle in &connections {
                    handle.abort();
                }
            }
        }

        outcome
    }

    /// Prepare the path, bind, and restrict the socket to its owner
    fn bind(&self) -> Result<(UnixListener, SocketCleanupGuard)> {
        prepare_socket_path(&self.socket_path)?;

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| bind_error(&self.socket_path, e.to_string()))?;
        let guard = SocketCleanupGuard::new(&self.socket_path);

        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            bind_error(
                &self.socket_path,
                format!("failed to restrict permissions: {}", e),
            )
        })?;

        Ok((listener, guard))
    }

    fn spawn_connection(&self, stream: UnixStream, socket_name: &str) -> JoinHandle<()> {
        let client_id = self.connection_counter.fetch_add(1, Ordering::Relaxed);
        let agent = Arc::clone(&self.agent);
        let audit = self.audit.clone();
        let socket_name = socket_name.to_string();

        debug!(client_id, "Client connected");
        self.record(LogEvent::client_connect(
            socket_name.clone(),
            client_id.to_string(),
        ));

        tokio::spawn(async move {
            if let Err(e) = serve_connection(agent, stream).await {
                debug!(client_id, error = %e, "Connection ended with error");
            }
            debug!(client_id, "Client disconnected");
            if let Some(audit) = audit {
                audit.record(&LogEvent::client_disconnect(
                    socket_name,
                    client_id.to_string(),
                ));
            }
        })
    }

    fn record(&self, event: LogEvent) {
        if let Some(audit) = &self.audit {
            audit.record(&event);
        }
    }
}

fn bind_error(path: &Path, reason: impl Into<String>) -> Error {
    Error::Bind {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Make `path` bindable without clobbering anything that is not a stale socket
pub(crate) fn prepare_socket_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                return Err(bind_error(path, "refusing to replace a symlink"));
            }
            if !file_type.is_socket() {
                return Err(bind_error(path, "path exists and is not a socket"));
            }
            match std::os::unix::net::UnixStream::connect(path) {
                Ok(_) => return Err(bind_error(path, "socket is already in use")),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!(path = %path.display(), "Removing stale socket");
                    fs::remove_file(path).map_err(|e| {
                        bind_error(path, format!("failed to remove stale socket: {}", e))
                    })?;
                }
                Err(e) => {
                    return Err(bind_error(
                        path,
                        format!("cannot check existing socket: {}", e),
                    ));
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(bind_error(path, format!("cannot inspect path: {}", e)));
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(bind_error(
            path,
            format!("parent directory {} does not exist", parent.display()),
        ));
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// The pending connection went away; keep accepting
    Transient,
    /// Out of descriptors or memory; retry after a pause
    Exhausted,
    Fatal,
}

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    use io::ErrorKind::*;
    if matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut
    ) {
        return AcceptFailure::Transient;
    }
    match e.raw_os_error() {
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) => {
            AcceptFailure::Exhausted
        }
        Some(libc::EPROTO) => AcceptFailure::Transient,
        _ => AcceptFailure::Fatal,
    }
}

/// Removes the socket file when dropped
struct SocketCleanupGuard {
    path: PathBuf,
}

impl SocketCleanupGuard {
    fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Drop for SocketCleanupGuard {
    fn drop(&mut self) {
        let is_socket = fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false);
        if !is_socket {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove socket file during cleanup"
            );
        } else {
            debug!(path = %self.path.display(), "Removed socket file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn reason(err: Error) -> String {
        match err {
            Error::Bind { reason, .. } => reason,
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_missing_path() {
        let dir = tempdir().unwrap();
        assert!(prepare_socket_path(&dir.path().join("agent.sock")).is_ok());
    }

    #[test]
    fn test_prepare_missing_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("agent.sock");
        let err = prepare_socket_path(&path).unwrap_err();
        assert!(reason(err).contains("does not exist"));
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_prepare_regular_file_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        fs::write(&path, b"keep me").unwrap();

        let err = prepare_socket_path(&path).unwrap_err();
        assert!(reason(err).contains("not a socket"));
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_prepare_directory_refused() {
        let dir = tempdir().unwrap();
        assert!(prepare_socket_path(dir.path()).is_err());
    }

    #[test]
    fn test_prepare_symlink_refused() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link.sock");
        fs::write(&target, b"target").unwrap();
        symlink(&target, &link).unwrap();

        let err = prepare_socket_path(&link).unwrap_err();
        assert!(reason(err).contains("symlink"));
        assert!(fs::symlink_metadata(&link).is_ok());
    }

    #[test]
    fn test_prepare_live_socket_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let err = prepare_socket_path(&path).unwrap_err();
        assert!(reason(err).contains("already in use"));
        assert!(path.exists());
    }

    #[test]
    fn test_prepare_stale_socket_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        prepare_socket_path(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_cleanup_guard_only_removes_sockets() {
        let dir = tempdir().unwrap();
        let sock = dir.path().join("agent.sock");
        let file = dir.path().join("plain");
        drop(std::os::unix::net::UnixListener::bind(&sock).unwrap());
        fs::write(&file, b"x").unwrap();

        drop(SocketCleanupGuard::new(&sock));
        drop(SocketCleanupGuard::new(&file));

        assert!(!sock.exists());
        assert!(file.exists());
    }

    #[test]
    fn test_classify_accept_error() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(classify_accept_error(&aborted), AcceptFailure::Transient);

        let emfile = io::Error::from_raw_os_error(libc::EMFILE);
        assert_eq!(classify_accept_error(&emfile), AcceptFailure::Exhausted);

        let badf = io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(classify_accept_error(&badf), AcceptFailure::Fatal);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.in_flight, InFlightPolicy::Finish);
    }
}
