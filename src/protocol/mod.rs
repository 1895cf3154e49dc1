//! SSH Agent Protocol framing and message payloads
//!
//! Wire format as defined in:
//! https://datatracker.ietf.org/doc/html/draft-miller-ssh-agent

pub mod codec;
pub mod message;

pub use codec::AgentCodec;
pub use message::{AddedKey, AgentMessage, Identity, MessageType, SignRequest};
