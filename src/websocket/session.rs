//! Minimal application loop for accepted connections.
//!
//! Honors the `handshake` mode contract: the first message must be
//! `{"type":"auth","access_token":"..."}` and arrive before the deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite::Message;

use crate::auth::AccountabilityResolver;
use crate::connection_manager::ConnectionHandle;

use super::controller::AcceptedConnection;
use super::message::{ClientMessage, ServerMessage};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Serve one accepted connection until it closes.
#[tracing::instrument(name = "ws.session", skip_all, fields(connection_id = %conn.handle.id))]
pub async fn run_session(mut conn: AcceptedConnection, resolver: Arc<dyn AccountabilityResolver>) {
    if let Some(deadline) = conn.auth_deadline {
        let result = tokio::time::timeout(deadline, authenticate_first_message(&mut conn, &*resolver)).await;
        let failure = match result {
            Ok(Ok(user_id)) => {
                let _ = send(&conn.handle, ServerMessage::Authenticated { user_id }).await;
                None
            }
            Ok(Err(message)) => Some(ServerMessage::error("AUTH_FAILED", message)),
            Err(_) => Some(ServerMessage::error("AUTH_TIMEOUT", "Authentication timed out")),
        };

        if let Some(error) = failure {
            tracing::info!("Handshake authentication failed, closing");
            let _ = send(&conn.handle, error).await;
            let _ = conn.handle.send(Message::Close(None)).await;

            // Peer gets a grace period to finish the close handshake.
            let drained = tokio::time::timeout(CLOSE_GRACE, async {
                while conn.incoming.recv().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::debug!("Peer ignored close, terminating");
                conn.handle.terminate();
            }
            return;
        }
    }

    while let Some(msg) = conn.incoming.recv().await {
        process_message(msg, &conn.handle).await;
    }
}

/// Returns the authenticated user or a message for the peer.
async fn authenticate_first_message(
    conn: &mut AcceptedConnection,
    resolver: &dyn AccountabilityResolver,
) -> Result<String, String> {
    let msg = conn
        .incoming
        .recv()
        .await
        .ok_or_else(|| "Connection closed before authentication".to_string())?;

    let Message::Text(text) = msg else {
        return Err("Expected an auth message".to_string());
    };

    let access_token = match serde_json::from_str::<ClientMessage>(text.as_str()) {
        Ok(ClientMessage::Auth { access_token }) => access_token,
        Ok(_) => return Err("Expected an auth message".to_string()),
        Err(e) => return Err(format!("Invalid message: {}", e)),
    };

    let accountability = resolver.resolve(&access_token).await.map_err(|e| {
        tracing::warn!(error = %e, "Handshake credential rejected");
        "Invalid credentials".to_string()
    })?;

    let Some(user_id) = accountability.user.clone().filter(|u| !u.is_empty()) else {
        return Err("Invalid credentials".to_string());
    };
    conn.handle.set_accountability(accountability);
    Ok(user_id)
}

async fn process_message(msg: Message, handle: &Arc<ConnectionHandle>) {
    match msg {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Ping) => {
                let _ = send(handle, ServerMessage::Pong).await;
            }
            Ok(ClientMessage::Auth { .. }) => {
                let _ = send(
                    handle,
                    ServerMessage::error("ALREADY_AUTHENTICATED", "Connection is already authenticated"),
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse client message");
                let _ = send(handle, ServerMessage::error("INVALID_MESSAGE", e.to_string())).await;
            }
        },
        Message::Binary(_) => {
            let _ = send(
                handle,
                ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported"),
            )
            .await;
        }
        _ => {}
    }
}

async fn send(
    handle: &ConnectionHandle,
    message: ServerMessage,
) -> Result<(), crate::connection_manager::ConnectionClosed> {
    let text = match message.to_json() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize message");
            return Ok(());
        }
    };
    handle.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tokio::sync::mpsc;

    use crate::auth::JwtResolver;
    use crate::config::{AuthMode, JwtConfig};
    use crate::websocket::UpgradeRequest;

    fn resolver() -> Arc<dyn AccountabilityResolver> {
        Arc::new(JwtResolver::new(&JwtConfig {
            secret: "session-test-secret".to_string(),
            issuer: None,
            audience: None,
            leeway: 0,
        }))
    }

    fn accepted() -> (AcceptedConnection, mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        let (handle, outbound) = ConnectionHandle::new("/websocket", AuthMode::Handshake, None, None);
        let (inbound_tx, incoming) = mpsc::channel(8);
        let request =
            UpgradeRequest::from_request(Request::builder().uri("/websocket").body(()).unwrap());
        let conn = AcceptedConnection {
            handle: Arc::new(handle),
            request,
            incoming,
            auth_deadline: Some(Duration::from_secs(5)),
        };
        (conn, inbound_tx, outbound)
    }

    #[tokio::test]
    async fn test_failed_auth_terminates_peer_that_ignores_close() {
        let (conn, inbound_tx, mut outbound) = accepted();
        let handle = conn.handle.clone();

        inbound_tx
            .send(Message::Text(r#"{"type":"auth","access_token":"bogus"}"#.into()))
            .await
            .unwrap();
        run_session(conn, resolver()).await;

        let error = outbound.recv().await.unwrap();
        assert!(error.to_text().unwrap().contains("AUTH_FAILED"));
        assert!(matches!(outbound.recv().await.unwrap(), Message::Close(_)));
        // inbound_tx is still open: the peer never finished the close
        assert!(handle.is_terminated());
        drop(inbound_tx);
    }

    #[tokio::test]
    async fn test_failed_auth_without_terminate_when_peer_closes() {
        let (conn, inbound_tx, _outbound) = accepted();
        let handle = conn.handle.clone();

        inbound_tx.send(Message::Binary(vec![1, 2].into())).await.unwrap();
        drop(inbound_tx);
        run_session(conn, resolver()).await;

        assert!(!handle.is_terminated());
    }
}
