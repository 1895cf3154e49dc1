//! Error types for authsock-scope

use thiserror::Error;

/// Main error type for authsock-scope
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("SSH key error: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend agent could not be reached
    #[error("Upstream agent not available: {0}")]
    UpstreamNotAvailable(String),

    /// The backend agent answered with SSH_AGENT_FAILURE
    #[error("Upstream agent rejected {0}")]
    UpstreamRejected(String),

    /// The initial key list could not be fetched from the backend
    #[error("Failed to fetch key list from upstream agent: {0}")]
    ListFetch(#[source] Box<Error>),

    #[error("Key not allowed: {0}")]
    KeyNotAllowed(String),

    #[error("Operation denied by policy: {0}")]
    OperationDenied(String),

    /// The listening socket could not be created
    #[error("Failed to bind socket at {path}: {reason}")]
    Bind { path: String, reason: String },

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the backend agent could not be reached,
    /// either directly or while taking the initial key list
    pub fn is_upstream_unavailable(&self) -> bool {
        match self {
            Error::UpstreamNotAvailable(_) => true,
            Error::ListFetch(inner) => inner.is_upstream_unavailable(),
            _ => false,
        }
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
