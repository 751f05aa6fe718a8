use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::connection_manager::{ConnectionHandle, RegistrationGuard};
use crate::metrics::ConnectionMetrics;

use super::message::UpgradeError;
use super::negotiator::WebSocket;

/// How long to wait for the peer to answer a close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why a connection task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Terminated,
    PeerClosed,
    ApplicationClosed,
    TransportError,
}

/// Pump frames between the socket and the application until either side
/// closes or the handle is terminated.
///
/// Every wait in the loop also watches the termination flag, so a backlogged
/// application or a peer that stops reading cannot keep the socket alive.
/// Owns the registration guard, so the connection leaves the registry the
/// moment this returns.
#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(connection_id = %handle.id, user_id = handle.user_id().unwrap_or("-"))
)]
pub(crate) async fn drive_connection(
    socket: WebSocket,
    handle: Arc<ConnectionHandle>,
    mut outbound: mpsc::Receiver<Message>,
    inbound: mpsc::Sender<Message>,
    guard: RegistrationGuard,
) {
    let started = Instant::now();
    let mut termination = handle.termination();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let reason = 'pump: loop {
        tokio::select! {
            biased;
            _ = terminated(&mut termination) => break CloseReason::Terminated,
            Some(msg) = outbound.recv() => {
                if let Err(reason) = forward(&mut ws_sender, msg, &mut termination).await {
                    break reason;
                }
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers pings itself
                    handle.update_activity();
                }
                Some(Ok(msg)) => {
                    handle.update_activity();

                    // Keep draining outbound while the application catches up.
                    let permit = loop {
                        tokio::select! {
                            biased;
                            _ = terminated(&mut termination) => break 'pump CloseReason::Terminated,
                            permit = inbound.reserve() => match permit {
                                Ok(permit) => break permit,
                                Err(_) => break 'pump CloseReason::ApplicationClosed,
                            },
                            Some(out) = outbound.recv() => {
                                if let Err(reason) = forward(&mut ws_sender, out, &mut termination).await {
                                    break 'pump reason;
                                }
                            }
                        }
                    };
                    permit.send(msg);
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break CloseReason::TransportError;
                }
            },
        }
    };

    match reason {
        // Dropping both halves closes the transport without a close frame.
        CloseReason::Terminated => {}
        CloseReason::PeerClosed => {
            // Flushes the close reply tungstenite queued for us.
            let _ = tokio::time::timeout(CLOSE_GRACE, ws_sender.close()).await;
        }
        CloseReason::ApplicationClosed => {
            let _ = tokio::time::timeout(CLOSE_GRACE, async {
                if ws_sender.send(Message::Close(None)).await.is_ok() {
                    while let Some(Ok(_)) = ws_receiver.next().await {}
                }
            })
            .await;
        }
        CloseReason::TransportError => {}
    }

    drop(guard);
    let duration = started.elapsed().as_secs_f64();
    ConnectionMetrics::record_duration(duration);

    tracing::info!(
        connection_id = %handle.id,
        reason = ?reason,
        duration_secs = duration,
        "Connection closed"
    );
}

/// Resolves once the handle is terminated. The borrow of the watch value
/// ends here, so callers stay `Send`.
async fn terminated(termination: &mut watch::Receiver<bool>) {
    let _ = termination.wait_for(|terminated| *terminated).await;
}

/// Write one frame to the peer unless the connection is terminated first.
async fn forward(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    termination: &mut watch::Receiver<bool>,
) -> Result<(), CloseReason> {
    tokio::select! {
        biased;
        _ = terminated(termination) => Err(CloseReason::Terminated),
        sent = ws_sender.send(msg) => sent.map_err(|_| CloseReason::TransportError),
    }
}

/// Tell the peer why its upgrade was vetoed, then close normally.
pub(crate) async fn close_with_error(mut socket: WebSocket, reason: &str) {
    let payload = UpgradeError::new(reason).to_json();
    if let Err(e) = socket.send(Message::Text(payload.into())).await {
        tracing::debug!(error = %e, "Could not deliver filter rejection");
        return;
    }
    if socket.close(None).await.is_err() {
        return;
    }
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = socket.next().await {}
    })
    .await;
}
