use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::auth::{AccountabilityResolver, AuthRejection, AuthenticationGate};
use crate::config::{AuthMode, SocketConfig};
use crate::connection_manager::{ConnectionHandle, ConnectionRegistry};
use crate::error::GatewayError;
use crate::filter::{FilterOutcome, FilterPipeline};
use crate::metrics::UpgradeMetrics;
use crate::server::io::BoxedTransport;
use crate::server::UpgradeHandler;

use super::connection::{close_with_error, drive_connection};
use super::negotiator::{TungsteniteNegotiator, UpgradeNegotiator};
use super::UpgradeRequest;

const UNAUTHORIZED: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\r\n";

const ACCEPT_BUFFER_SIZE: usize = 64;
const INBOUND_BUFFER_SIZE: usize = 32;

/// Bytes a client may send before the handshake completes
const MAX_EARLY_BYTES: usize = 64 * 1024;

/// An upgrade attempt as delivered by the shared listener.
pub struct RawUpgrade {
    pub request: UpgradeRequest,
    pub socket: BoxedTransport,
    /// Bytes read past the end of the request head
    pub head: Bytes,
}

impl RawUpgrade {
    pub fn new(request: UpgradeRequest, socket: BoxedTransport, head: Bytes) -> Self {
        Self {
            request,
            socket,
            head,
        }
    }
}

impl std::fmt::Debug for RawUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawUpgrade")
            .field("request", &self.request)
            .field("head_len", &self.head.len())
            .finish_non_exhaustive()
    }
}

/// Terminal result of one upgrade attempt.
#[derive(Debug)]
pub enum UpgradeOutcome {
    /// Path belongs to someone else; the upgrade is handed back untouched.
    Ignored(RawUpgrade),
    /// `401` written, transport closed.
    Rejected(AuthRejection),
    /// Handshake done, a filter vetoed it; error frame sent, connection closed.
    Filtered { hook: String, reason: String },
    /// Registered and emitted to the application.
    Accepted(Uuid),
    /// Peer went away (or nobody consumes accepted connections); nothing written.
    Abandoned,
}

impl UpgradeOutcome {
    fn label(&self) -> &'static str {
        match self {
            UpgradeOutcome::Ignored(_) => "ignored",
            UpgradeOutcome::Rejected(_) => "rejected",
            UpgradeOutcome::Filtered { .. } => "filtered",
            UpgradeOutcome::Accepted(_) => "accepted",
            UpgradeOutcome::Abandoned => "abandoned",
        }
    }
}

/// A connection that made it through every stage, handed to the application.
///
/// In `handshake` mode `auth_deadline` is set and the connection carries no
/// accountability yet: the application must authenticate the peer from its
/// first message within the deadline and close it otherwise (see
/// [`run_session`](super::run_session)).
pub struct AcceptedConnection {
    pub handle: Arc<ConnectionHandle>,
    pub request: UpgradeRequest,
    /// Data frames from the peer. Ends when the connection closes.
    pub incoming: mpsc::Receiver<Message>,
    pub auth_deadline: Option<Duration>,
}

/// Gatekeeper for one endpoint on the shared listener.
///
/// Runs path match, authentication, handshake, filters and registration, in
/// that order, for every upgrade request it is offered.
pub struct UpgradeController {
    config: Arc<SocketConfig>,
    gate: AuthenticationGate,
    negotiator: Arc<dyn UpgradeNegotiator>,
    filters: FilterPipeline,
    registry: Arc<ConnectionRegistry>,
    accepted_tx: mpsc::Sender<AcceptedConnection>,
}

impl UpgradeController {
    /// Create a controller using the default WebSocket negotiator.
    ///
    /// The receiver yields every accepted connection; dropping it makes the
    /// controller close connections right after acceptance.
    pub fn new(
        config: SocketConfig,
        resolver: Arc<dyn AccountabilityResolver>,
        filters: FilterPipeline,
    ) -> (Arc<Self>, mpsc::Receiver<AcceptedConnection>) {
        Self::with_negotiator(config, resolver, filters, Arc::new(TungsteniteNegotiator::new()))
    }

    pub fn with_negotiator(
        config: SocketConfig,
        resolver: Arc<dyn AccountabilityResolver>,
        filters: FilterPipeline,
        negotiator: Arc<dyn UpgradeNegotiator>,
    ) -> (Arc<Self>, mpsc::Receiver<AcceptedConnection>) {
        let (accepted_tx, accepted_rx) = mpsc::channel(ACCEPT_BUFFER_SIZE);
        let gate = AuthenticationGate::new(&config.auth, resolver);

        tracing::info!(
            endpoint = %config.endpoint,
            mode = config.auth.mode.as_str(),
            filters = filters.len(),
            "Upgrade controller created"
        );

        let controller = Self {
            config: Arc::new(config),
            gate,
            negotiator,
            filters,
            registry: Arc::new(ConnectionRegistry::new()),
            accepted_tx,
        };
        (Arc::new(controller), accepted_rx)
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Hooks for this controller; new hooks apply to later upgrades.
    pub fn filters(&self) -> &FilterPipeline {
        &self.filters
    }

    /// Handle one upgrade attempt.
    ///
    /// Only a failed handshake is reported as an error. Everything else ends
    /// in an [`UpgradeOutcome`].
    pub async fn on_upgrade(&self, raw: RawUpgrade) -> Result<UpgradeOutcome, GatewayError> {
        if raw.request.path() != self.config.endpoint {
            return Ok(UpgradeOutcome::Ignored(raw));
        }

        let result = self.process(raw).await;
        match &result {
            Ok(outcome) => UpgradeMetrics::record_outcome(outcome.label()),
            Err(_) => UpgradeMetrics::record_outcome("failed"),
        }
        result
    }

    /// Force-close every registered connection. Returns how many were closed.
    pub fn terminate(&self) -> usize {
        let count = self.registry.terminate_all();
        tracing::info!(endpoint = %self.config.endpoint, count, "Controller terminated connections");
        count
    }

    #[tracing::instrument(
        name = "ws.upgrade",
        skip_all,
        fields(endpoint = %self.config.endpoint, mode = self.config.auth.mode.as_str())
    )]
    async fn process(&self, raw: RawUpgrade) -> Result<UpgradeOutcome, GatewayError> {
        let RawUpgrade {
            mut request,
            mut socket,
            head,
        } = raw;
        let mut head = BytesMut::from(&head[..]);

        if self.gate.mode() != AuthMode::Public {
            let decision = tokio::select! {
                biased;
                decision = self.gate.authenticate(&mut request) => decision,
                _ = wait_for_disconnect(&mut socket, &mut head) => {
                    tracing::debug!("Peer left during authentication");
                    return Ok(UpgradeOutcome::Abandoned);
                }
            };

            if let Err(rejection) = decision {
                write_unauthorized(&mut socket).await;
                return Ok(UpgradeOutcome::Rejected(rejection));
            }
        }

        let socket = self
            .negotiator
            .negotiate(&request, socket, head.freeze())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Handshake failed");
                e
            })?;

        let request = match self.filters.run(request, self.config.clone()).await {
            FilterOutcome::Proceed(request) => request,
            FilterOutcome::Abort { hook, reason } => {
                UpgradeMetrics::record_filter_abort();
                tracing::warn!(hook = %hook, reason = %reason, "Upgrade aborted by filter");
                close_with_error(socket, &reason).await;
                return Ok(UpgradeOutcome::Filtered { hook, reason });
            }
        };

        let (handle, outbound) = ConnectionHandle::new(
            self.config.endpoint.clone(),
            self.config.auth.mode,
            request.remote_addr(),
            request.accountability().cloned(),
        );
        let handle = Arc::new(handle);
        let guard = match self.registry.register(handle.clone()) {
            Ok(guard) => guard,
            Err(e) => {
                close_with_error(socket, "connection could not be registered").await;
                return Err(e.into());
            }
        };

        let (inbound_tx, incoming) = mpsc::channel(INBOUND_BUFFER_SIZE);
        tokio::spawn(drive_connection(socket, handle.clone(), outbound, inbound_tx, guard));

        let auth_deadline = (self.config.auth.mode == AuthMode::Handshake)
            .then(|| Duration::from_secs(self.config.auth.timeout));
        let accepted = AcceptedConnection {
            handle: handle.clone(),
            request,
            incoming,
            auth_deadline,
        };

        if self.accepted_tx.send(accepted).await.is_err() {
            tracing::warn!(connection_id = %handle.id, "No consumer for accepted connections, closing");
            handle.terminate();
            self.registry.unregister(handle.id);
            return Ok(UpgradeOutcome::Abandoned);
        }

        tracing::info!(
            connection_id = %handle.id,
            user_id = handle.user_id().unwrap_or("-"),
            "Upgrade accepted"
        );
        Ok(UpgradeOutcome::Accepted(handle.id))
    }
}

#[async_trait]
impl UpgradeHandler for UpgradeController {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn on_upgrade(&self, raw: RawUpgrade) -> Result<UpgradeOutcome, GatewayError> {
        UpgradeController::on_upgrade(self, raw).await
    }

    fn terminate(&self) -> usize {
        UpgradeController::terminate(self)
    }
}

/// Resolve once the peer closes or breaks the transport. Bytes that arrive in
/// the meantime are kept in `head` for the negotiator.
async fn wait_for_disconnect(socket: &mut BoxedTransport, head: &mut BytesMut) {
    loop {
        match socket.read_buf(head).await {
            Ok(0) => return,
            Ok(_) if head.len() > MAX_EARLY_BYTES => {
                tracing::debug!(buffered = head.len(), "Too much data before handshake");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Transport error during authentication");
                return;
            }
        }
    }
}

/// Write the rejection status line and close. A dead transport is not an error.
async fn write_unauthorized(socket: &mut BoxedTransport) {
    if let Err(e) = socket.write_all(UNAUTHORIZED).await {
        tracing::debug!(error = %e, "Could not write 401 to transport");
        return;
    }
    let _ = socket.flush().await;
    let _ = socket.shutdown().await;
}
