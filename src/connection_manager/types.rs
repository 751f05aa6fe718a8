//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::auth::AccountabilityContext;
use crate::config::AuthMode;

const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Handle for a single accepted connection.
///
/// The socket itself lives in the connection task; the handle is how the rest
/// of the process talks to it.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub endpoint: String,
    pub mode: AuthMode,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    accountability: OnceLock<AccountabilityContext>,
    sender: mpsc::Sender<Message>,
    terminate_tx: watch::Sender<bool>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the connection task drains into the
    /// socket.
    pub fn new(
        endpoint: impl Into<String>,
        mode: AuthMode,
        remote_addr: Option<SocketAddr>,
        accountability: Option<AccountabilityContext>,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (sender, rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (terminate_tx, _) = watch::channel(false);
        let now = Utc::now();

        let cell = OnceLock::new();
        if let Some(ctx) = accountability {
            let _ = cell.set(ctx);
        }

        let handle = Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            mode,
            remote_addr,
            connected_at: now,
            accountability: cell,
            sender,
            terminate_tx,
            last_activity: AtomicI64::new(now.timestamp()),
        };
        (handle, rx)
    }

    pub fn accountability(&self) -> Option<&AccountabilityContext> {
        self.accountability.get()
    }

    /// Record the context established after the handshake (`handshake` mode).
    /// Returns `false` if one is already attached.
    pub fn set_accountability(&self, accountability: AccountabilityContext) -> bool {
        self.accountability.set(accountability).is_ok()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.accountability().and_then(|a| a.user.as_deref())
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Queue a frame for the peer.
    pub async fn send(&self, message: Message) -> Result<(), ConnectionClosed> {
        self.sender.send(message).await.map_err(|_| ConnectionClosed(self.id))
    }

    /// Ask the connection task to drop the socket without a close handshake.
    /// Returns `true` only for the call that actually flipped the flag.
    pub fn terminate(&self) -> bool {
        !self.terminate_tx.send_replace(true)
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminate_tx.borrow()
    }

    /// Receiver that observes [`terminate`](Self::terminate).
    pub fn termination(&self) -> watch::Receiver<bool> {
        self.terminate_tx.subscribe()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("mode", &self.mode)
            .field("user_id", &self.user_id())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// The connection task is gone; nothing can be delivered any more.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub Uuid);
