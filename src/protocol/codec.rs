//! Length-prefixed framing for agent messages over tokio streams

use crate::error::{Error, Result};
use crate::protocol::message::AgentMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (OpenSSH AGENT_MAX_LEN)
pub const MAX_MESSAGE_SIZE: u32 = 256 * 1024;

/// Codec for reading and writing SSH agent messages
pub struct AgentCodec;

impl AgentCodec {
    /// Read one message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between frames.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<AgentMessage>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf);
        if len == 0 {
            return Err(Error::InvalidMessage("Zero-length message".to_string()));
        }
        if len > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidMessage(format!(
                "Message too large: {} bytes (limit {})",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Protocol(format!("Stream closed inside a {} byte frame", len))
            } else {
                Error::Io(e)
            }
        })?;

        AgentMessage::decode(&buf).map(Some)
    }

    /// Write one message and flush
    pub async fn write<W: AsyncWrite + Unpin>(writer: &mut W, msg: &AgentMessage) -> Result<()> {
        writer.write_all(&msg.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[tokio::test]
    async fn test_read_clean_eof() {
        let mut stream = tokio_test::io::Builder::new().build();
        assert!(AgentCodec::read(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 1, 11])
            .build();
        let msg = AgentCodec::read(&mut stream).await.unwrap().unwrap();
        assert_eq!(msg.msg_type, MessageType::RequestIdentities);
        assert!(msg.payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_zero_length_rejected() {
        let mut stream = tokio_test::io::Builder::new().read(&[0, 0, 0, 0]).build();
        let err = AgentCodec::read(&mut stream).await.unwrap_err();
        assert!(err.to_string().contains("Zero-length"));
    }

    #[tokio::test]
    async fn test_read_oversized_rejected() {
        let len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut stream = tokio_test::io::Builder::new().read(&len).build();
        let err = AgentCodec::read(&mut stream).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_read_truncated_frame() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 8, 13, 1])
            .build();
        let err = AgentCodec::read(&mut stream).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut stream = tokio_test::io::Builder::new().write(&[0, 0, 0, 1, 6]).build();
        AgentCodec::write(&mut stream, &AgentMessage::success())
            .await
            .unwrap();
    }
}
