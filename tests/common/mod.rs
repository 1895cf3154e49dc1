//! Shared fixtures: test keys, an in-memory agent, and a socket-backed mock upstream
#![allow(dead_code)]

use async_trait::async_trait;
use authsock_scope::agent::{AddedKey, Agent, Identity, SignRequest, Signer, serve_connection};
use authsock_scope::{Error, Result};
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::UnixListener;

pub const ED25519_KEY_WORK: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl user@work.example.com";
pub const ED25519_KEY_PERSONAL: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHUu2eEV0kRvK3dMRlSFwHxVoNxCfwjKmAZBlhkNjC4i user@personal.example.com";
pub const ED25519_KEY_DEV: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIKwfZn/9xXqbDtEzpAEZEoEBllBkLR+NpVHhMxCmyC9L dev@work.example.com";

pub fn identity(key: &str) -> Identity {
    Identity::from_openssh(key).unwrap()
}

pub fn fingerprint(key: &str) -> String {
    identity(key).fingerprint().unwrap().to_string()
}

pub fn all_keys() -> Vec<Identity> {
    vec![
        identity(ED25519_KEY_WORK),
        identity(ED25519_KEY_PERSONAL),
        identity(ED25519_KEY_DEV),
    ]
}

/// In-memory agent that counts calls.
///
/// Signatures are `sig:` followed by the signed data.
pub struct MockAgent {
    me: Weak<MockAgent>,
    keys: Mutex<Vec<Identity>>,
    fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
    pub sign_calls: AtomicUsize,
    pub mutation_calls: AtomicUsize,
    pub lock_calls: AtomicUsize,
}

impl MockAgent {
    pub fn new(keys: Vec<Identity>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            keys: Mutex::new(keys),
            fail_list: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
            mutation_calls: AtomicUsize::new(0),
            lock_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_keys(&self, keys: Vec<Identity>) {
        *self.keys.lock().unwrap() = keys;
    }

    pub fn keys(&self) -> Vec<Identity> {
        self.keys.lock().unwrap().clone()
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn list(&self) -> Result<Vec<Identity>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::UpstreamNotAvailable("mock agent is down".into()));
        }
        Ok(self.keys())
    }

    async fn sign(&self, request: SignRequest) -> Result<Bytes> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if !self.keys().iter().any(|k| k.key_blob == request.key_blob) {
            return Err(Error::UpstreamRejected("SSH_AGENTC_SIGN_REQUEST".into()));
        }
        let mut signature = b"sig:".to_vec();
        signature.extend_from_slice(&request.data);
        Ok(Bytes::from(signature))
    }

    async fn add(&self, _key: AddedKey) -> Result<()> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key_blob: Bytes) -> Result<()> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().retain(|k| k.key_blob != key_blob);
        Ok(())
    }

    async fn remove_all(&self) -> Result<()> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().clear();
        Ok(())
    }

    async fn lock(&self, _passphrase: &[u8]) -> Result<()> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unlock(&self, _passphrase: &[u8]) -> Result<()> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn signers(&self) -> Result<Vec<Signer>> {
        let me: Arc<dyn Agent> = self
            .me
            .upgrade()
            .ok_or_else(|| Error::Other("mock agent dropped".into()))?;
        Ok(self
            .keys()
            .into_iter()
            .map(|identity| Signer::new(identity, Arc::clone(&me)))
            .collect())
    }
}

/// Serve `agent` on a Unix socket at `path`, standing in for the real ssh-agent
pub fn start_mock_upstream(path: &Path, agent: Arc<MockAgent>) {
    let listener = UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let agent: Arc<dyn Agent> = agent.clone();
            tokio::spawn(async move {
                let _ = serve_connection(agent, stream).await;
            });
        }
    });
}

/// Poll until `path` exists (or not), failing after two seconds
pub async fn wait_for_path(path: &Path, present: bool) {
    for _ in 0..200 {
        if path.exists() == present {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "{} did not {} in time",
        path.display(),
        if present { "appear" } else { "disappear" }
    );
}
