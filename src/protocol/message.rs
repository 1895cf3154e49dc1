//! SSH Agent Protocol message types and parsing

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ssh_key::{Fingerprint, HashAlg, PublicKey};

/// Maximum number of identities allowed in a single message.
/// This prevents malicious agents from causing excessive memory allocation.
const MAX_IDENTITIES: u32 = 10000;

/// Maximum size for a single string field (key blob, comment, data).
/// Matches the frame limit, no field can be larger than its frame.
pub(crate) const MAX_BLOB_SIZE: u32 = 256 * 1024;

/// SSH Agent message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Requests from client
    RequestIdentities = 11,
    SignRequest = 13,
    AddIdentity = 17,
    RemoveIdentity = 18,
    RemoveAllIdentities = 19,
    AddIdConstrained = 25,
    AddSmartcardKey = 20,
    RemoveSmartcardKey = 21,
    Lock = 22,
    Unlock = 23,
    AddSmartcardKeyConstrained = 26,
    Extension = 27,

    // Responses from agent
    Failure = 5,
    Success = 6,
    IdentitiesAnswer = 12,
    SignResponse = 14,
    ExtensionFailure = 28,

    // Unknown message type
    Unknown = 0,
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            11 => MessageType::RequestIdentities,
            13 => MessageType::SignRequest,
            17 => MessageType::AddIdentity,
            18 => MessageType::RemoveIdentity,
            19 => MessageType::RemoveAllIdentities,
            25 => MessageType::AddIdConstrained,
            20 => MessageType::AddSmartcardKey,
            21 => MessageType::RemoveSmartcardKey,
            22 => MessageType::Lock,
            23 => MessageType::Unlock,
            26 => MessageType::AddSmartcardKeyConstrained,
            27 => MessageType::Extension,
            5 => MessageType::Failure,
            6 => MessageType::Success,
            12 => MessageType::IdentitiesAnswer,
            14 => MessageType::SignResponse,
            28 => MessageType::ExtensionFailure,
            _ => MessageType::Unknown,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

impl MessageType {
    /// Get the message type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::RequestIdentities => "SSH_AGENTC_REQUEST_IDENTITIES",
            MessageType::SignRequest => "SSH_AGENTC_SIGN_REQUEST",
            MessageType::AddIdentity => "SSH_AGENTC_ADD_IDENTITY",
            MessageType::RemoveIdentity => "SSH_AGENTC_REMOVE_IDENTITY",
            MessageType::RemoveAllIdentities => "SSH_AGENTC_REMOVE_ALL_IDENTITIES",
            MessageType::AddIdConstrained => "SSH_AGENTC_ADD_ID_CONSTRAINED",
            MessageType::AddSmartcardKey => "SSH_AGENTC_ADD_SMARTCARD_KEY",
            MessageType::RemoveSmartcardKey => "SSH_AGENTC_REMOVE_SMARTCARD_KEY",
            MessageType::Lock => "SSH_AGENTC_LOCK",
            MessageType::Unlock => "SSH_AGENTC_UNLOCK",
            MessageType::AddSmartcardKeyConstrained => "SSH_AGENTC_ADD_SMARTCARD_KEY_CONSTRAINED",
            MessageType::Extension => "SSH_AGENTC_EXTENSION",
            MessageType::Failure => "SSH_AGENT_FAILURE",
            MessageType::Success => "SSH_AGENT_SUCCESS",
            MessageType::IdentitiesAnswer => "SSH_AGENT_IDENTITIES_ANSWER",
            MessageType::SignResponse => "SSH_AGENT_SIGN_RESPONSE",
            MessageType::ExtensionFailure => "SSH_AGENT_EXTENSION_FAILURE",
            MessageType::Unknown => "UNKNOWN",
        }
    }
}

/// Read one SSH `string` (u32 length + bytes) from the front of `buf`
fn take_string<'a>(buf: &mut &'a [u8], field: &str) -> Result<&'a [u8]> {
    if buf.remaining() < 4 {
        return Err(Error::InvalidMessage(format!(
            "Message too short for {}",
            field
        )));
    }
    let len_u32 = buf.get_u32();
    if len_u32 > MAX_BLOB_SIZE {
        return Err(Error::InvalidMessage(format!(
            "{} size {} exceeds maximum allowed {}",
            field, len_u32, MAX_BLOB_SIZE
        )));
    }
    let len = usize::try_from(len_u32).map_err(|_| {
        Error::InvalidMessage(format!(
            "{} length {} cannot be converted to usize",
            field, len_u32
        ))
    })?;
    if buf.remaining() < len {
        return Err(Error::InvalidMessage(format!("{} truncated", field)));
    }
    let whole: &'a [u8] = buf;
    let (head, tail) = whole.split_at(len);
    *buf = tail;
    Ok(head)
}

fn put_string(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// An SSH key identity from the agent
#[derive(Debug, Clone)]
pub struct Identity {
    /// Raw public key blob
    pub key_blob: Bytes,
    /// Comment associated with the key
    pub comment: String,
    /// Parsed public key (if parsing succeeded)
    pub public_key: Option<PublicKey>,
}

impl Identity {
    /// Parse an identity from key blob and comment
    pub fn new(key_blob: Bytes, comment: String) -> Self {
        let public_key = PublicKey::from_bytes(&key_blob).ok();
        Self {
            key_blob,
            comment,
            public_key,
        }
    }

    /// Build an identity from an OpenSSH public key line (`ssh-ed25519 AAAA... comment`)
    pub fn from_openssh(line: &str) -> Result<Self> {
        let public_key = PublicKey::from_openssh(line)?;
        let key_blob = Bytes::from(public_key.to_bytes()?);
        Ok(Self {
            key_blob,
            comment: public_key.comment().to_string(),
            public_key: Some(public_key),
        })
    }

    /// Get the SHA256 fingerprint of this key
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.public_key
            .as_ref()
            .map(|k| k.fingerprint(HashAlg::Sha256))
    }

    /// Get the key type as a string
    pub fn key_type(&self) -> Option<String> {
        self.public_key
            .as_ref()
            .map(|k| k.algorithm().as_str().to_string())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.key_blob == other.key_blob && self.comment == other.comment
    }
}

impl Eq for Identity {}

/// Parsed SSH_AGENTC_SIGN_REQUEST payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Public key blob of the key that should sign
    pub key_blob: Bytes,
    /// Data to be signed
    pub data: Bytes,
    /// Signature flags (SSH_AGENT_RSA_SHA2_256, ...)
    pub flags: u32,
}

impl SignRequest {
    /// Create a new sign request
    pub fn new(key_blob: Bytes, data: Bytes, flags: u32) -> Self {
        Self {
            key_blob,
            data,
            flags,
        }
    }

    /// Parse a SignRequest message
    pub fn parse(msg: &AgentMessage) -> Result<Self> {
        if msg.msg_type != MessageType::SignRequest {
            return Err(Error::InvalidMessage(format!(
                "Expected SignRequest, got {:?}",
                msg.msg_type
            )));
        }

        let mut buf = &msg.payload[..];
        let key_blob = Bytes::copy_from_slice(take_string(&mut buf, "Key blob")?);
        let data = Bytes::copy_from_slice(take_string(&mut buf, "Sign data")?);
        // Some older clients omit the flags word entirely
        let flags = if buf.remaining() >= 4 { buf.get_u32() } else { 0 };

        Ok(Self {
            key_blob,
            data,
            flags,
        })
    }

    /// Encode as a SignRequest message
    pub fn to_message(&self) -> AgentMessage {
        let mut payload = BytesMut::new();
        put_string(&mut payload, &self.key_blob);
        put_string(&mut payload, &self.data);
        payload.put_u32(self.flags);
        AgentMessage::new(MessageType::SignRequest, payload.freeze())
    }

    /// Identity view of the requested key (no comment)
    pub fn identity(&self) -> Identity {
        Identity::new(self.key_blob.clone(), String::new())
    }
}

/// Private key material from an ADD_IDENTITY / ADD_ID_CONSTRAINED request.
///
/// The proxy never interprets private keys, the payload is carried as-is.
#[derive(Clone, PartialEq, Eq)]
pub struct AddedKey {
    /// Raw request payload (key type, key fields, comment, constraints)
    pub payload: Bytes,
    /// Whether the request carried constraints
    pub constrained: bool,
}

impl AddedKey {
    /// Create from a raw payload
    pub fn new(payload: Bytes, constrained: bool) -> Self {
        Self {
            payload,
            constrained,
        }
    }

    /// Extract from an add-identity message
    pub fn from_message(msg: &AgentMessage) -> Result<Self> {
        let constrained = match msg.msg_type {
            MessageType::AddIdentity => false,
            MessageType::AddIdConstrained => true,
            other => {
                return Err(Error::InvalidMessage(format!(
                    "Expected AddIdentity, got {:?}",
                    other
                )));
            }
        };
        Ok(Self::new(msg.payload.clone(), constrained))
    }

    /// Encode back into the matching add-identity message
    pub fn to_message(&self) -> AgentMessage {
        let msg_type = if self.constrained {
            MessageType::AddIdConstrained
        } else {
            MessageType::AddIdentity
        };
        AgentMessage::new(msg_type, self.payload.clone())
    }

    /// Key type name, the leading string of the payload
    pub fn key_type(&self) -> Option<String> {
        let mut buf = &self.payload[..];
        take_string(&mut buf, "Key type")
            .ok()
            .map(|s| String::from_utf8_lossy(s).to_string())
    }
}

impl std::fmt::Debug for AddedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddedKey")
            .field("key_type", &self.key_type())
            .field("constrained", &self.constrained)
            .finish_non_exhaustive()
    }
}

/// SSH Agent protocol message
#[derive(Debug, Clone)]
pub struct AgentMessage {
    /// Message type
    pub msg_type: MessageType,
    /// Raw message payload (excluding type byte)
    pub payload: Bytes,
}

impl AgentMessage {
    /// Create a new message
    pub fn new(msg_type: MessageType, payload: Bytes) -> Self {
        Self { msg_type, payload }
    }

    /// Create a failure response
    pub fn failure() -> Self {
        Self::new(MessageType::Failure, Bytes::new())
    }

    /// Create a success response
    pub fn success() -> Self {
        Self::new(MessageType::Success, Bytes::new())
    }

    /// Create a REQUEST_IDENTITIES request
    pub fn request_identities() -> Self {
        Self::new(MessageType::RequestIdentities, Bytes::new())
    }

    /// Create a REMOVE_ALL_IDENTITIES request
    pub fn remove_all_identities() -> Self {
        Self::new(MessageType::RemoveAllIdentities, Bytes::new())
    }

    /// Create a REMOVE_IDENTITY request for the given key blob
    pub fn remove_identity(key_blob: &[u8]) -> Self {
        let mut payload = BytesMut::new();
        put_string(&mut payload, key_blob);
        Self::new(MessageType::RemoveIdentity, payload.freeze())
    }

    /// Create a LOCK request
    pub fn lock(passphrase: &[u8]) -> Self {
        Self::with_passphrase(MessageType::Lock, passphrase)
    }

    /// Create an UNLOCK request
    pub fn unlock(passphrase: &[u8]) -> Self {
        Self::with_passphrase(MessageType::Unlock, passphrase)
    }

    fn with_passphrase(msg_type: MessageType, passphrase: &[u8]) -> Self {
        let mut payload = BytesMut::new();
        put_string(&mut payload, passphrase);
        Self::new(msg_type, payload.freeze())
    }

    /// Create a SIGN_RESPONSE carrying an encoded signature blob
    pub fn sign_response(signature: &[u8]) -> Self {
        let mut payload = BytesMut::new();
        put_string(&mut payload, signature);
        Self::new(MessageType::SignResponse, payload.freeze())
    }

    /// Parse identities from an IdentitiesAnswer message
    pub fn parse_identities(&self) -> Result<Vec<Identity>> {
        if self.msg_type != MessageType::IdentitiesAnswer {
            return Err(Error::InvalidMessage(format!(
                "Expected IdentitiesAnswer, got {:?}",
                self.msg_type
            )));
        }

        let mut buf = &self.payload[..];
        if buf.remaining() < 4 {
            return Err(Error::InvalidMessage("Message too short".to_string()));
        }

        let count = buf.get_u32();
        if count > MAX_IDENTITIES {
            return Err(Error::InvalidMessage(format!(
                "Identity count {} exceeds maximum allowed {}",
                count, MAX_IDENTITIES
            )));
        }

        let capacity = usize::try_from(count).map_err(|_| {
            Error::InvalidMessage(format!(
                "Identity count {} cannot be converted to usize",
                count
            ))
        })?;
        let mut identities = Vec::with_capacity(capacity);

        for _ in 0..count {
            let key_blob = Bytes::copy_from_slice(take_string(&mut buf, "Key blob")?);
            let comment = String::from_utf8_lossy(take_string(&mut buf, "Comment")?).to_string();
            identities.push(Identity::new(key_blob, comment));
        }

        Ok(identities)
    }

    /// Build an IdentitiesAnswer message from a list of identities
    ///
    /// # Panics
    /// Panics if the number of identities exceeds u32::MAX (practically impossible).
    pub fn build_identities_answer(identities: &[Identity]) -> Self {
        let mut payload = BytesMut::new();
        let count = u32::try_from(identities.len()).expect("identity count exceeds u32::MAX");
        payload.put_u32(count);

        for identity in identities {
            put_string(&mut payload, &identity.key_blob);
            put_string(&mut payload, identity.comment.as_bytes());
        }

        Self::new(MessageType::IdentitiesAnswer, payload.freeze())
    }

    /// Parse the signature blob from a SignResponse message
    pub fn parse_sign_response(&self) -> Result<Bytes> {
        if self.msg_type != MessageType::SignResponse {
            return Err(Error::InvalidMessage(format!(
                "Expected SignResponse, got {:?}",
                self.msg_type
            )));
        }
        let mut buf = &self.payload[..];
        Ok(Bytes::copy_from_slice(take_string(&mut buf, "Signature")?))
    }

    /// Parse the key blob from a RemoveIdentity message
    pub fn parse_remove_identity(&self) -> Result<Bytes> {
        if self.msg_type != MessageType::RemoveIdentity {
            return Err(Error::InvalidMessage(format!(
                "Expected RemoveIdentity, got {:?}",
                self.msg_type
            )));
        }
        let mut buf = &self.payload[..];
        Ok(Bytes::copy_from_slice(take_string(&mut buf, "Key blob")?))
    }

    /// Parse the passphrase from a Lock or Unlock message
    pub fn parse_passphrase(&self) -> Result<Bytes> {
        if !matches!(self.msg_type, MessageType::Lock | MessageType::Unlock) {
            return Err(Error::InvalidMessage(format!(
                "Expected Lock or Unlock, got {:?}",
                self.msg_type
            )));
        }
        let mut buf = &self.payload[..];
        Ok(Bytes::copy_from_slice(take_string(&mut buf, "Passphrase")?))
    }

    /// Encode the message to bytes (including length prefix)
    pub fn encode(&self) -> Bytes {
        let total_len = 1 + self.payload.len();
        let mut buf = BytesMut::with_capacity(4 + total_len);
        buf.put_u32(total_len as u32);
        buf.put_u8(self.msg_type.into());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a message from bytes (excluding length prefix)
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((&type_byte, payload)) = data.split_first() else {
            return Err(Error::InvalidMessage("Empty message".to_string()));
        };

        Ok(Self::new(
            MessageType::from(type_byte),
            Bytes::copy_from_slice(payload),
        ))
    }
}
