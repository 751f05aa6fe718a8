//! The byte-level WebSocket handshake.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::server::io::BoxedTransport;

use super::UpgradeRequest;

/// A negotiated WebSocket over whatever transport the listener accepted.
pub type WebSocket = WebSocketStream<BoxedTransport>;

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("method {0} cannot be upgraded")]
    Method(Method),

    #[error("missing or invalid {0} header")]
    Header(&'static str),

    #[error("unsupported protocol version")]
    Version,

    #[error("transport failed during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Completes the protocol handshake for a request that already passed the gate.
#[async_trait]
pub trait UpgradeNegotiator: Send + Sync {
    /// `head` holds bytes the client sent after its request head; they belong
    /// to the upgraded protocol.
    async fn negotiate(
        &self,
        request: &UpgradeRequest,
        socket: BoxedTransport,
        head: Bytes,
    ) -> Result<WebSocket, NegotiationError>;
}

/// RFC 6455 server handshake on top of tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteNegotiator;

impl TungsteniteNegotiator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpgradeNegotiator for TungsteniteNegotiator {
    async fn negotiate(
        &self,
        request: &UpgradeRequest,
        mut socket: BoxedTransport,
        head: Bytes,
    ) -> Result<WebSocket, NegotiationError> {
        let accept_key = match validate_handshake(request.method(), request.headers()) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(path = %request.path(), error = %e, "Handshake rejected");
                if let Err(write_err) = socket.write_all(BAD_REQUEST).await {
                    tracing::debug!(error = %write_err, "Could not write handshake rejection");
                }
                let _ = socket.shutdown().await;
                return Err(e);
            }
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            accept_key
        );
        socket.write_all(response.as_bytes()).await?;
        socket.flush().await?;

        Ok(WebSocketStream::from_partially_read(socket, head.to_vec(), Role::Server, None).await)
    }
}

/// Check the upgrade headers and return the `Sec-WebSocket-Accept` value.
pub fn validate_handshake(method: &Method, headers: &HeaderMap) -> Result<String, NegotiationError> {
    if method != Method::GET {
        return Err(NegotiationError::Method(method.clone()));
    }

    let upgrade_ok = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    if !upgrade_ok {
        return Err(NegotiationError::Header("Upgrade"));
    }

    if !headers
        .get(header::CONNECTION)
        .is_some_and(|v| header_contains_token(v, "upgrade"))
    {
        return Err(NegotiationError::Header("Connection"));
    }

    let version_ok = headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "13");
    if !version_ok {
        return Err(NegotiationError::Version);
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(NegotiationError::Header("Sec-WebSocket-Key"))?;

    Ok(derive_accept_key(key.as_bytes()))
}

fn header_contains_token(value: &HeaderValue, token: &str) -> bool {
    value
        .to_str()
        .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}
