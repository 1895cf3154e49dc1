//! Upstream SSH agent connection
//!
//! The backend agent is usually reached through the SSH_AUTH_SOCK environment
//! variable. Every operation dials a fresh connection, so concurrent callers
//! never share a stream and the backend serializes them itself.

use crate::agent::{AddedKey, Agent, Identity, SignRequest, Signer};
use crate::error::{Error, Result};
use crate::protocol::{AgentCodec, AgentMessage, MessageType};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::trace;

/// Default connection timeout for upstream agent
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection to an upstream SSH agent
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Path to the upstream agent socket
    socket_path: PathBuf,
}

impl Upstream {
    /// Create a new upstream connection manager
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Dial the backend once to make sure it is reachable
    pub async fn check_reachable(&self) -> Result<()> {
        self.connect().await.map(drop)
    }

    /// Connect to the upstream agent with timeout
    pub async fn connect(&self) -> Result<UpstreamConnection> {
        let stream = tokio::time::timeout(
            DEFAULT_CONNECT_TIMEOUT,
            UnixStream::connect(&self.socket_path),
        )
        .await
        .map_err(|_| {
            Error::UpstreamNotAvailable(format!(
                "Connection to upstream agent at {} timed out after {:?}",
                self.socket_path.display(),
                DEFAULT_CONNECT_TIMEOUT
            ))
        })?
        .map_err(|e| {
            Error::UpstreamNotAvailable(format!(
                "Failed to connect to upstream agent at {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        trace!(socket_path = %self.socket_path.display(), "Connected to upstream agent");
        Ok(UpstreamConnection { stream })
    }

    /// One request/response exchange; a FAILURE reply becomes `UpstreamRejected`
    async fn call(&self, msg: &AgentMessage) -> Result<AgentMessage> {
        let mut conn = self.connect().await?;
        let response = conn.send_receive(msg).await?;
        if response.msg_type == MessageType::Failure {
            return Err(Error::UpstreamRejected(msg.msg_type.as_str().to_string()));
        }
        Ok(response)
    }

    async fn call_expect_success(&self, msg: &AgentMessage) -> Result<()> {
        let response = self.call(msg).await?;
        match response.msg_type {
            MessageType::Success => Ok(()),
            other => Err(Error::Protocol(format!(
                "Unexpected {} reply to {}",
                other.as_str(),
                msg.msg_type.as_str()
            ))),
        }
    }
}

#[async_trait]
impl Agent for Upstream {
    async fn list(&self) -> Result<Vec<Identity>> {
        self.call(&AgentMessage::request_identities())
            .await?
            .parse_identities()
    }

    async fn sign(&self, request: SignRequest) -> Result<Bytes> {
        self.call(&request.to_message())
            .await?
            .parse_sign_response()
    }

    async fn add(&self, key: AddedKey) -> Result<()> {
        self.call_expect_success(&key.to_message()).await
    }

    async fn remove(&self, key_blob: Bytes) -> Result<()> {
        self.call_expect_success(&AgentMessage::remove_identity(&key_blob))
            .await
    }

    async fn remove_all(&self) -> Result<()> {
        self.call_expect_success(&AgentMessage::remove_all_identities())
            .await
    }

    async fn lock(&self, passphrase: &[u8]) -> Result<()> {
        self.call_expect_success(&AgentMessage::lock(passphrase))
            .await
    }

    async fn unlock(&self, passphrase: &[u8]) -> Result<()> {
        self.call_expect_success(&AgentMessage::unlock(passphrase))
            .await
    }

    async fn signers(&self) -> Result<Vec<Signer>> {
        let agent: Arc<dyn Agent> = Arc::new(self.clone());
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|identity| Signer::new(identity, Arc::clone(&agent)))
            .collect())
    }
}

/// An active connection to the upstream agent
#[derive(Debug)]
pub struct UpstreamConnection {
    stream: UnixStream,
}

impl UpstreamConnection {
    /// Send a message to the upstream agent and receive the response
    pub async fn send_receive(&mut self, msg: &AgentMessage) -> Result<AgentMessage> {
        trace!(msg_type = ?msg.msg_type, "Sending message to upstream");

        let (mut reader, mut writer) = self.stream.split();

        AgentCodec::write(&mut writer, msg).await?;

        let response = AgentCodec::read(&mut reader).await?.ok_or_else(|| {
            Error::Protocol("Upstream agent closed connection unexpectedly".to_string())
        })?;

        trace!(response_type = ?response.msg_type, "Received response from upstream");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    const ED25519_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl user@work.example.com";

    /// Answers identities with one key, signs with a fixed blob, rejects everything else
    async fn spawn_backend(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("backend.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    while let Ok(Some(msg)) = AgentCodec::read(&mut stream).await {
                        let reply = match msg.msg_type {
                            MessageType::RequestIdentities => {
                                let id = Identity::from_openssh(ED25519_KEY).unwrap();
                                AgentMessage::build_identities_answer(&[id])
                            }
                            MessageType::SignRequest => AgentMessage::sign_response(b"sig"),
                            MessageType::Lock => AgentMessage::success(),
                            _ => AgentMessage::failure(),
                        };
                        if AgentCodec::write(&mut stream, &reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        path
    }

    #[test]
    fn test_upstream_new() {
        let upstream = Upstream::new("/tmp/test.sock");
        assert_eq!(upstream.socket_path(), Path::new("/tmp/test.sock"));
    }

    #[tokio::test]
    async fn test_connect_nonexistent_socket() {
        let upstream = Upstream::new("/tmp/nonexistent-socket-12345.sock");
        let err = upstream.check_reachable().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamNotAvailable(_)));
        assert!(err.to_string().contains("Failed to connect"));
    }

    #[tokio::test]
    async fn test_connect_not_a_socket() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-socket.txt");
        std::fs::write(&file, "test").unwrap();
        let upstream = Upstream::new(&file);
        assert!(upstream.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_list_and_sign() {
        let dir = TempDir::new().unwrap();
        let upstream = Upstream::new(spawn_backend(&dir).await);

        let keys = upstream.list().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].comment, "user@work.example.com");

        let request = SignRequest::new(keys[0].key_blob.clone(), Bytes::from_static(b"data"), 0);
        assert_eq!(&upstream.sign(request).await.unwrap()[..], b"sig");

        upstream.lock(b"pw").await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_reply_is_rejection() {
        let dir = TempDir::new().unwrap();
        let upstream = Upstream::new(spawn_backend(&dir).await);

        let err = upstream.remove_all().await.unwrap_err();
        assert!(matches!(err, Error::UpstreamRejected(_)));
        assert!(!err.is_upstream_unavailable());
    }

    #[tokio::test]
    async fn test_signers_sign_through_backend() {
        let dir = TempDir::new().unwrap();
        let upstream = Upstream::new(spawn_backend(&dir).await);

        let signers = upstream.signers().await.unwrap();
        assert_eq!(signers.len(), 1);
        let sig = signers[0].sign(Bytes::from_static(b"x"), 0).await.unwrap();
        assert_eq!(&sig[..], b"sig");
    }
}
