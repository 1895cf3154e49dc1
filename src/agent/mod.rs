//! SSH agent capability surface and its implementations
//!
//! - `Agent`: the eight-operation capability trait
//! - `Upstream`: forwards every operation to the backend agent socket
//! - `FilteringAgent`: restricts a shared backend to an allow-list
//! - `Server`: Unix socket server with idle-timeout shutdown
//! - `serve_connection`: per-connection request loop

mod filtering;
mod idle;
mod server;
mod session;
mod upstream;

pub use filtering::{FilterOptions, FilteringAgent, ListMode, MutationPolicy};
pub use idle::IdleTimer;
pub use server::{InFlightPolicy, Server, ServerConfig, ShutdownReason};
pub(crate) use server::prepare_socket_path;
pub use session::serve_connection;
pub use upstream::Upstream;

pub use crate::protocol::{AddedKey, Identity, SignRequest};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// The operations an SSH agent offers its clients
#[async_trait]
pub trait Agent: Send + Sync {
    /// Enumerate the identities this agent exposes
    async fn list(&self) -> Result<Vec<Identity>>;

    /// Sign data with one of the exposed keys, returning the encoded signature blob
    async fn sign(&self, request: SignRequest) -> Result<Bytes>;

    /// Add private key material
    async fn add(&self, key: AddedKey) -> Result<()>;

    /// Remove the identity with the given public key blob
    async fn remove(&self, key_blob: Bytes) -> Result<()>;

    /// Remove every identity
    async fn remove_all(&self) -> Result<()>;

    /// Lock the agent with a passphrase
    async fn lock(&self, passphrase: &[u8]) -> Result<()>;

    /// Unlock the agent
    async fn unlock(&self, passphrase: &[u8]) -> Result<()>;

    /// Signing handles for the exposed keys
    async fn signers(&self) -> Result<Vec<Signer>>;
}

/// A key paired with the agent that signs for it
#[derive(Clone)]
pub struct Signer {
    identity: Identity,
    agent: Arc<dyn Agent>,
}

impl Signer {
    pub fn new(identity: Identity, agent: Arc<dyn Agent>) -> Self {
        Self { identity, agent }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sign `data` through the owning agent
    pub async fn sign(&self, data: Bytes, flags: u32) -> Result<Bytes> {
        let request = SignRequest::new(self.identity.key_blob.clone(), data, flags);
        self.agent.sign(request).await
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("fingerprint", &self.identity.fingerprint().map(|fp| fp.to_string()))
            .field("comment", &self.identity.comment)
            .finish()
    }
}
