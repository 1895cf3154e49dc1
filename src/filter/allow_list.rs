//! Fingerprint allow-list

use crate::error::{Error, Result};
use crate::protocol::Identity;
use ssh_key::{Fingerprint, HashAlg, PublicKey};
use std::collections::HashSet;

/// Set of SHA256 fingerprints permitted through the proxy.
///
/// An empty list is the pass-through state: every key is permitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    /// Canonical fingerprints in configuration order, deduplicated
    entries: Vec<String>,
    lookup: HashSet<String>,
}

impl AllowList {
    /// Build from configured entries.
    ///
    /// Each entry is either a fingerprint (`SHA256:...`) or an OpenSSH public
    /// key line (`ssh-ed25519 AAAA... [comment]`), which is reduced to its
    /// fingerprint.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let fingerprint = parse_entry(entry.as_ref())?;
            if list.lookup.insert(fingerprint.clone()) {
                list.entries.push(fingerprint);
            }
        }
        Ok(list)
    }

    /// The allow-list that permits every key
    pub fn pass_through() -> Self {
        Self::default()
    }

    pub fn is_pass_through(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured fingerprints, in order
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Whether the fingerprint string is listed (ignores pass-through)
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lookup.contains(fingerprint)
    }

    /// Whether the identity may be exposed
    pub fn permits(&self, identity: &Identity) -> bool {
        if self.is_pass_through() {
            return true;
        }
        identity
            .fingerprint()
            .is_some_and(|fp| self.contains(&fp.to_string()))
    }

    /// Keep permitted identities, preserving their order
    pub fn filter(&self, identities: Vec<Identity>) -> Vec<Identity> {
        if self.is_pass_through() {
            return identities;
        }
        identities
            .into_iter()
            .filter(|identity| self.permits(identity))
            .collect()
    }

    /// Listed fingerprints that none of the identities carry
    pub fn missing_from(&self, identities: &[Identity]) -> Vec<&str> {
        let present: HashSet<String> = identities
            .iter()
            .filter_map(|identity| identity.fingerprint())
            .map(|fp| fp.to_string())
            .collect();
        self.entries
            .iter()
            .filter(|fp| !present.contains(fp.as_str()))
            .map(String::as_str)
            .collect()
    }
}

fn parse_entry(entry: &str) -> Result<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(Error::InvalidFingerprint("empty entry".to_string()));
    }

    if entry.starts_with("SHA256:") {
        let fingerprint: Fingerprint = entry
            .parse()
            .map_err(|e| Error::InvalidFingerprint(format!("{}: {}", entry, e)))?;
        return Ok(fingerprint.to_string());
    }

    if entry.contains(char::is_whitespace) {
        let key = PublicKey::from_openssh(entry)
            .map_err(|e| Error::InvalidFingerprint(format!("invalid public key: {}", e)))?;
        return Ok(key.fingerprint(HashAlg::Sha256).to_string());
    }

    Err(Error::InvalidFingerprint(format!(
        "{}. Expected SHA256:... or an OpenSSH public key",
        entry
    )))
}
