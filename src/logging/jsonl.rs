//! JSONL (JSON Lines) audit log
//!
//! Each event is one JSON object on one line, appended to the configured file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Audit event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogEventKind {
    ServerStart,
    ServerStop,
    ClientConnect,
    ClientDisconnect,
    /// Identity list answered
    IdentitiesResponse,
    /// Sign request decided
    SignResponse,
    /// Key hidden from a list
    KeyFiltered,
    /// Add/remove refused by the mutation policy
    MutationDenied,
    /// No connection arrived within the idle timeout
    IdleTimeout,
    Error,
}

impl std::fmt::Display for LogEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogEventKind::ServerStart => "server_start",
            LogEventKind::ServerStop => "server_stop",
            LogEventKind::ClientConnect => "client_connect",
            LogEventKind::ClientDisconnect => "client_disconnect",
            LogEventKind::IdentitiesResponse => "identities_response",
            LogEventKind::SignResponse => "sign_response",
            LogEventKind::KeyFiltered => "key_filtered",
            LogEventKind::MutationDenied => "mutation_denied",
            LogEventKind::IdleTimeout => "idle_timeout",
            LogEventKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Decision result for sign requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allowed => write!(f, "allowed"),
            Decision::Denied => write!(f, "denied"),
        }
    }
}

/// A structured audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub kind: LogEventKind,

    /// Listening socket path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// SSH key fingerprint (SHA256 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// SSH key type (e.g., "ssh-ed25519", "ssh-rsa")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Number of keys returned (for identity responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u32>,

    /// Number of keys hidden
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    /// Create a new event with the current timestamp
    pub fn new(kind: LogEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            socket_name: None,
            client_id: None,
            fingerprint: None,
            comment: None,
            key_type: None,
            decision: None,
            reason: None,
            key_count: None,
            filtered_count: None,
            error: None,
        }
    }

    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn with_fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.fingerprint = Some(fp.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_key_type(mut self, key_type: impl Into<String>) -> Self {
        self.key_type = Some(key_type.into());
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_key_count(mut self, count: usize) -> Self {
        self.key_count = Some(u32::try_from(count).unwrap_or(u32::MAX));
        self
    }

    pub fn with_filtered_count(mut self, count: usize) -> Self {
        self.filtered_count = Some(u32::try_from(count).unwrap_or(u32::MAX));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Create a server start event
    pub fn server_start(socket_path: impl Into<String>) -> Self {
        Self::new(LogEventKind::ServerStart).with_socket_name(socket_path)
    }

    /// Create a server stop event
    pub fn server_stop(socket_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(LogEventKind::ServerStop)
            .with_socket_name(socket_path)
            .with_reason(reason)
    }

    /// Create a client connect event
    pub fn client_connect(socket_path: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::new(LogEventKind::ClientConnect)
            .with_socket_name(socket_path)
            .with_client_id(client_id)
    }

    /// Create a client disconnect event
    pub fn client_disconnect(socket_path: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::new(LogEventKind::ClientDisconnect)
            .with_socket_name(socket_path)
            .with_client_id(client_id)
    }

    /// Create a sign decision event
    pub fn sign_response(fingerprint: impl Into<String>, decision: Decision) -> Self {
        Self::new(LogEventKind::SignResponse)
            .with_fingerprint(fingerprint)
            .with_decision(decision)
    }

    /// Create a key filtered event
    pub fn key_filtered(fingerprint: impl Into<String>, comment: impl Into<String>) -> Self {
        Self::new(LogEventKind::KeyFiltered)
            .with_fingerprint(fingerprint)
            .with_comment(comment)
            .with_reason("not in allow-list")
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogEventKind::Error).with_error(message)
    }

    /// Serialize the event to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSONL file writer with thread-safe buffered output
pub struct JsonlWriter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlWriter {
    /// Open the file for appending, creating it and its parent directory
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Write an event to the file
    pub fn write(&self, event: &LogEvent) -> std::io::Result<()> {
        let json = event
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Write an event, reporting failures through tracing
    pub fn record(&self, event: &LogEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(kind = %event.kind, "Failed to write audit log event: {}", e);
        }
    }

    /// Flush any buffered data to the file
    pub fn flush(&self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writer.flush()
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[test]
    fn test_log_event_builder() {
        let event = LogEvent::sign_response("SHA256:abc123", Decision::Denied)
            .with_comment("test@example.com")
            .with_key_type("ssh-ed25519");

        assert_eq!(event.kind, LogEventKind::SignResponse);
        assert_eq!(event.decision, Some(Decision::Denied));
        assert_eq!(event.fingerprint.as_deref(), Some("SHA256:abc123"));
        assert_eq!(event.key_type.as_deref(), Some("ssh-ed25519"));
        assert!(event.socket_name.is_none());
    }

    #[test]
    fn test_log_event_serialize_skips_empty_fields() {
        let json = LogEvent::server_start("/tmp/test.sock").to_json().unwrap();

        assert!(json.contains("\"kind\":\"server_start\""));
        assert!(json.contains("\"socket_name\":\"/tmp/test.sock\""));
        assert!(json.contains("\"timestamp\":"));
        assert!(!json.contains("fingerprint"));
    }

    #[test]
    fn test_log_event_deserialize() {
        let event = LogEvent::key_filtered("SHA256:abc", "user@host");
        let parsed: LogEvent = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(parsed.kind, LogEventKind::KeyFiltered);
        assert_eq!(parsed.reason.as_deref(), Some("not in allow-list"));
    }

    #[test]
    fn test_jsonl_writer_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("audit.jsonl");

        {
            let writer = JsonlWriter::new(&path).unwrap();
            writer.record(&LogEvent::server_start("/tmp/test.sock"));
            writer.record(&LogEvent::client_connect("/tmp/test.sock", "1"));
        }

        let file = File::open(&path).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map(|l| l.unwrap()).collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"kind\":\"server_start\""));
        assert!(lines[1].contains("\"kind\":\"client_connect\""));
    }

    #[test]
    fn test_log_event_kind_display() {
        assert_eq!(LogEventKind::IdleTimeout.to_string(), "idle_timeout");
        assert_eq!(LogEventKind::MutationDenied.to_string(), "mutation_denied");
        assert_eq!(Decision::Allowed.to_string(), "allowed");
    }
}
