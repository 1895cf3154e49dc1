//! Detached background launch of the `run` command
//!
//! The child runs in its own session so it survives the launching shell.
//! `launch` returns once the child, still running, has bound its socket.

use crate::agent::prepare_socket_path;
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// How long to wait for the child to create its socket
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A successfully started background server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    pub pid: u32,
    pub socket_path: PathBuf,
}

/// Spawns `<executable> run --socket <path> [args...]` detached
#[derive(Debug, Clone)]
pub struct Supervisor {
    executable: PathBuf,
    ready_timeout: Duration,
}

impl Supervisor {
    /// Supervisor that re-executes the current binary
    pub fn new() -> Result<Self> {
        let executable = std::env::current_exe()
            .map_err(|e| Error::Supervisor(format!("Failed to get current executable path: {}", e)))?;
        Ok(Self::with_executable(executable))
    }

    pub fn with_executable<P: AsRef<Path>>(executable: P) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Start the server and wait until its socket is ready.
    ///
    /// The path is prepared the way the server does it before anything is
    /// spawned: a live socket or a non-socket file fails with `Error::Bind`,
    /// a stale socket is removed. If the child exits first or its socket
    /// does not appear in time, the child is killed and `Error::Supervisor`
    /// is returned.
    pub async fn launch(&self, socket_path: &Path, run_args: &[OsString]) -> Result<Launched> {
        prepare_socket_path(socket_path)?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg("run").arg("--socket").arg(socket_path).args(run_args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Supervisor(format!("Failed to start background process: {}", e)))?;
        let pid = child.id();
        debug!(pid, executable = %self.executable.display(), "Spawned background server");

        let mut child = scopeguard::guard(child, |mut child: Child| {
            let _ = child.kill();
            let _ = child.wait();
        });

        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Err(Error::Supervisor(format!(
                        "Background process exited before creating its socket ({})",
                        status
                    )));
                }
                Ok(None) => {
                    if is_ready(socket_path) {
                        break;
                    }
                }
                Err(e) => {
                    return Err(Error::Supervisor(format!(
                        "Failed to poll background process: {}",
                        e
                    )));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Supervisor(format!(
                    "Socket {} was not created within {:?}",
                    socket_path.display(),
                    self.ready_timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Detach: dropping a std Child neither kills nor waits
        drop(scopeguard::ScopeGuard::into_inner(child));

        info!(pid, socket = %socket_path.display(), "Background server ready");
        Ok(Launched {
            pid,
            socket_path: socket_path.to_path_buf(),
        })
    }
}

/// A socket with owner-only permissions sits at `path`.
///
/// The server restricts the mode only after its listener is bound and
/// listening, so clients can connect once this holds.
fn is_ready(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_socket() && m.permissions().mode() & 0o777 == 0o600)
        .unwrap_or(false)
}

/// Unique socket path under `$XDG_RUNTIME_DIR`, or the temp dir
pub fn default_socket_path() -> PathBuf {
    let base = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    base.join(format!(
        "authsock-scope-{}-{}.sock",
        std::process::id(),
        nanos
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_socket_path() {
        let path = default_socket_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("authsock-scope-{}-", std::process::id())));
        assert!(name.ends_with(".sock"));
    }

    #[tokio::test]
    async fn test_child_exiting_early_is_reported() {
        let dir = tempdir().unwrap();
        let supervisor = Supervisor::with_executable("/bin/false");

        let err = supervisor
            .launch(&dir.path().join("agent.sock"), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited before creating its socket"));
    }

    #[tokio::test]
    async fn test_ready_timeout_kills_child() {
        let dir = tempdir().unwrap();
        // ignores its arguments and never creates the socket
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let supervisor = Supervisor::with_executable(&script)
            .with_ready_timeout(Duration::from_millis(200));

        let err = supervisor
            .launch(&dir.path().join("agent.sock"), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("was not created within"));
    }

    #[tokio::test]
    async fn test_live_socket_at_path_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let _other = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let err = Supervisor::with_executable("/bin/false")
            .launch(&path, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bind { .. }), "{err:?}");
        assert!(err.to_string().contains("already in use"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_not_mistaken_for_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let err = Supervisor::with_executable("/bin/false")
            .launch(&path, &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited before creating its socket"));
        assert!(!path.exists());
    }

    #[test]
    fn test_is_ready_requires_owner_only_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        assert!(!is_ready(&path));

        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(!is_ready(&path));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(is_ready(&path));

        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(!is_ready(&file));
    }
}
