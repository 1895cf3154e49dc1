//! Allow-list enforcement in front of a shared backend agent

use crate::agent::{AddedKey, Agent, Identity, SignRequest, Signer};
use crate::error::{Error, Result};
use crate::filter::AllowList;
use crate::logging::{Decision, JsonlWriter, LogEvent, LogEventKind};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// When the exposed key list is computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMode {
    /// Query the backend on every list request
    #[default]
    Live,
    /// Use the list captured at construction
    Snapshot,
}

/// What happens to add/remove requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationPolicy {
    /// Forward unchanged to the backend.
    /// Callers can still add or remove keys they cannot see.
    #[default]
    Forward,
    /// Reject with `OperationDenied`
    Deny,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub list_mode: ListMode,
    pub mutations: MutationPolicy,
}

/// Agent that only exposes allow-listed keys of its backend
pub struct FilteringAgent {
    backend: Arc<dyn Agent>,
    allow_list: AllowList,
    options: FilterOptions,
    snapshot: Option<Vec<Identity>>,
    audit: Option<Arc<JsonlWriter>>,
}

impl FilteringAgent {
    /// Wrap `backend`, fetching its key list once.
    ///
    /// Fails with `Error::ListFetch` when the backend cannot list its keys.
    pub async fn new(
        backend: Arc<dyn Agent>,
        allow_list: AllowList,
        options: FilterOptions,
    ) -> Result<Self> {
        let keys = backend
            .list()
            .await
            .map_err(|e| Error::ListFetch(Box::new(e)))?;

        if allow_list.is_pass_through() {
            warn!("Allow-list is empty, every upstream key will be exposed");
        }
        for fingerprint in allow_list.missing_from(&keys) {
            warn!(fingerprint, "Allow-listed key is not held by the upstream agent");
        }

        let exposed = allow_list.filter(keys.clone());
        info!(
            upstream_keys = keys.len(),
            exposed_keys = exposed.len(),
            list_mode = ?options.list_mode,
            mutations = ?options.mutations,
            "Key filter ready"
        );

        let snapshot = (options.list_mode == ListMode::Snapshot).then_some(exposed);

        Ok(Self {
            backend,
            allow_list,
            options,
            snapshot,
            audit: None,
        })
    }

    /// Record decisions to a JSONL audit log
    pub fn with_audit_log(mut self, audit: Arc<JsonlWriter>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn options(&self) -> FilterOptions {
        self.options
    }

    fn record(&self, event: LogEvent) {
        if let Some(audit) = &self.audit {
            audit.record(&event);
        }
    }

    fn restrict(&self, keys: Vec<Identity>) -> Vec<Identity> {
        let total = keys.len();
        let (exposed, hidden): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .partition(|identity| self.allow_list.permits(identity));

        for identity in &hidden {
            let fingerprint = fingerprint_of(identity);
            debug!(fingerprint = %fingerprint, comment = %identity.comment, "Key filtered");
            self.record(LogEvent::key_filtered(fingerprint, identity.comment.clone()));
        }
        self.record(
            LogEvent::new(LogEventKind::IdentitiesResponse)
                .with_key_count(exposed.len())
                .with_filtered_count(total - exposed.len()),
        );
        exposed
    }

    fn check_mutation(&self, operation: &str) -> Result<()> {
        match self.options.mutations {
            MutationPolicy::Forward => Ok(()),
            MutationPolicy::Deny => {
                debug!(operation, "Mutation denied by policy");
                self.record(LogEvent::new(LogEventKind::MutationDenied).with_reason(operation));
                Err(Error::OperationDenied(operation.to_string()))
            }
        }
    }
}

fn fingerprint_of(identity: &Identity) -> String {
    identity
        .fingerprint()
        .map(|fp| fp.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl Agent for FilteringAgent {
    async fn list(&self) -> Result<Vec<Identity>> {
        match &self.snapshot {
            Some(snapshot) => Ok(snapshot.clone()),
            None => {
                let keys = self.backend.list().await?;
                Ok(self.restrict(keys))
            }
        }
    }

    async fn sign(&self, request: SignRequest) -> Result<Bytes> {
        let identity = request.identity();
        let fingerprint = fingerprint_of(&identity);

        if !self.allow_list.permits(&identity) {
            warn!(fingerprint = %fingerprint, "Sign request for a key outside the allow-list");
            self.record(
                LogEvent::sign_response(fingerprint.clone(), Decision::Denied)
                    .with_reason("not in allow-list"),
            );
            return Err(Error::KeyNotAllowed(fingerprint));
        }

        let result = self.backend.sign(request).await;
        let mut event = LogEvent::sign_response(fingerprint.clone(), Decision::Allowed);
        if let Some(key_type) = identity.key_type() {
            event = event.with_key_type(key_type);
        }
        match &result {
            Ok(_) => debug!(fingerprint = %fingerprint, "Sign request forwarded"),
            Err(e) => {
                debug!(fingerprint = %fingerprint, "Upstream sign failed: {}", e);
                event = event.with_error(e.to_string());
            }
        }
        self.record(event);
        result
    }

    async fn add(&self, key: AddedKey) -> Result<()> {
        self.check_mutation("add identity")?;
        self.backend.add(key).await
    }

    async fn remove(&self, key_blob: Bytes) -> Result<()> {
        self.check_mutation("remove identity")?;
        self.backend.remove(key_blob).await
    }

    async fn remove_all(&self) -> Result<()> {
        self.check_mutation("remove all identities")?;
        self.backend.remove_all().await
    }

    async fn lock(&self, passphrase: &[u8]) -> Result<()> {
        self.backend.lock(passphrase).await
    }

    async fn unlock(&self, passphrase: &[u8]) -> Result<()> {
        self.backend.unlock(passphrase).await
    }

    async fn signers(&self) -> Result<Vec<Signer>> {
        match &self.snapshot {
            Some(snapshot) => Ok(snapshot
                .iter()
                .cloned()
                .map(|identity| Signer::new(identity, Arc::clone(&self.backend)))
                .collect()),
            None => Ok(self
                .backend
                .signers()
                .await?
                .into_iter()
                .filter(|signer| self.allow_list.permits(signer.identity()))
                .collect()),
        }
    }
}
