//! Per-connection request loop
//!
//! Each request frame maps to one `Agent` call. Capability errors and
//! malformed payloads are answered with SSH_AGENT_FAILURE and the connection
//! stays open; framing errors end the connection.

use crate::agent::{AddedKey, Agent, SignRequest};
use crate::error::{Error, Result};
use crate::protocol::{AgentCodec, AgentMessage, MessageType};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Serve agent requests on `stream` until the client closes it
pub async fn serve_connection<S>(agent: Arc<dyn Agent>, mut stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request = match AgentCodec::read(&mut stream).await? {
            Some(msg) => msg,
            None => {
                trace!("Client closed connection");
                break;
            }
        };

        trace!(msg_type = ?request.msg_type, "Received request from client");
        let response = handle_request(agent.as_ref(), request).await;
        AgentCodec::write(&mut stream, &response).await?;
    }

    Ok(())
}

/// Answer one request, mapping any error to a FAILURE frame
async fn handle_request(agent: &dyn Agent, request: AgentMessage) -> AgentMessage {
    let msg_type = request.msg_type;
    match dispatch(agent, request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(request = msg_type.as_str(), error = %e, "Request failed");
            AgentMessage::failure()
        }
    }
}

async fn dispatch(agent: &dyn Agent, request: AgentMessage) -> Result<AgentMessage> {
    match request.msg_type {
        MessageType::RequestIdentities => {
            let identities = agent.list().await?;
            Ok(AgentMessage::build_identities_answer(&identities))
        }
        MessageType::SignRequest => {
            let sign_request = SignRequest::parse(&request)?;
            let signature = agent.sign(sign_request).await?;
            Ok(AgentMessage::sign_response(&signature))
        }
        MessageType::AddIdentity | MessageType::AddIdConstrained => {
            agent.add(AddedKey::from_message(&request)?).await?;
            Ok(AgentMessage::success())
        }
        MessageType::RemoveIdentity => {
            agent.remove(request.parse_remove_identity()?).await?;
            Ok(AgentMessage::success())
        }
        MessageType::RemoveAllIdentities => {
            agent.remove_all().await?;
            Ok(AgentMessage::success())
        }
        MessageType::Lock => {
            agent.lock(&request.parse_passphrase()?).await?;
            Ok(AgentMessage::success())
        }
        MessageType::Unlock => {
            agent.unlock(&request.parse_passphrase()?).await?;
            Ok(AgentMessage::success())
        }
        other => Err(Error::Protocol(format!(
            "Unsupported request {}",
            other.as_str()
        ))),
    }
}
