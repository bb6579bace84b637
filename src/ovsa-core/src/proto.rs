//! The validation wire protocol.
//!
//! Length-prefixed (u32, network order) JSON messages over the mutually
//! authenticated TLS stream. The client opens with `Hello`, the service
//! acknowledges with its own `Hello`, the client sends `Validate`, and the
//! service answers `Authorize` or `Error`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::OvsaError;
use crate::tcb::TcbQuote;

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on one message body; a `Validate` carries only hashes,
/// nonces, and a quote.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// One protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Connection opener, both directions.
    Hello {
        /// Protocol version of the sender.
        version: u32,
    },
    /// The client's validation request.
    Validate {
        /// License to validate.
        license_guid: String,
        /// Hex SHA-384 the runtime computed over the canonical bundle
        /// payload.
        bundle_hash: String,
        /// Hex client nonce.
        nonce_client: String,
        /// base64 SEC1 client ephemeral key for the authorization exchange.
        kex_pubkey: String,
        /// The runtime's TCB quote.
        tcb_quote: TcbQuote,
    },
    /// The service's authorization.
    Authorize {
        /// Hex server nonce.
        nonce_server: String,
        /// base64 SEC1 server ephemeral key.
        kex_pubkey: String,
        /// Hex HMAC over (license_guid, nonce_client, nonce_server,
        /// bundle_hash) under the exchanged key.
        authorization: String,
    },
    /// Terminal failure answer.
    Error {
        /// Stable error tag (`OVSA_ERR_...`).
        tag: String,
        /// Human-readable detail, never secret material.
        message: String,
    },
}

/// The bytes the authorization token is computed over.
#[must_use]
pub fn authorization_input(
    license_guid: &str,
    nonce_client: &str,
    nonce_server: &str,
    bundle_hash: &str,
) -> Vec<u8> {
    let mut input = Vec::new();
    for part in [license_guid, nonce_client, nonce_server, bundle_hash] {
        input.extend_from_slice(part.as_bytes());
        input.push(0);
    }
    input
}

/// Write one length-prefixed message.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), OvsaError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| OvsaError::invalid(format!("message render: {e}")))?;
    let len = u32::try_from(body.len())
        .map_err(|_| OvsaError::invalid("message exceeds u32 length"))?;
    if len > MAX_MESSAGE_SIZE {
        return Err(OvsaError::invalid("message exceeds protocol maximum"));
    }
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| OvsaError::transient(format!("write: {e}")))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| OvsaError::transient(format!("write: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| OvsaError::transient(format!("flush: {e}")))?;
    Ok(())
}

/// Read one length-prefixed message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, OvsaError> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| OvsaError::transient(format!("read: {e}")))?;
    let len = u32::from_be_bytes(len_bytes);
    if len == 0 || len > MAX_MESSAGE_SIZE {
        return Err(OvsaError::invalid(format!("message length {len} rejected")));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| OvsaError::transient(format!("read: {e}")))?;
    serde_json::from_slice(&body).map_err(|e| OvsaError::invalid(format!("message parse: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let sent = Message::Hello {
            version: PROTOCOL_VERSION,
        };
        write_message(&mut client, &sent).await.unwrap();
        let received = read_message(&mut server).await.unwrap();
        assert!(matches!(received, Message::Hello { version: 1 }));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&(MAX_MESSAGE_SIZE + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transient() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        assert!(matches!(
            read_message(&mut server).await,
            Err(OvsaError::TransientUnavailable { .. })
        ));
    }

    #[test]
    fn test_authorization_input_is_injective_across_fields() {
        // The separator keeps ("ab", "c") distinct from ("a", "bc").
        let a = authorization_input("ab", "c", "n", "h");
        let b = authorization_input("a", "bc", "n", "h");
        assert_ne!(a, b);
    }
}
