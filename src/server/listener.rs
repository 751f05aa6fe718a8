//! The process-wide TCP listener shared by every upgrade controller and the
//! HTTP API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::websocket::{RawUpgrade, UpgradeOutcome, UpgradeRequest};

use super::head::{read_request_head, HeadError};
use super::io::{Rewind, Transport};

const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
const HEADERS_TOO_LARGE: &[u8] =
    b"HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Something that claims upgrade requests on the shared listener.
#[async_trait]
pub trait UpgradeHandler: Send + Sync {
    /// Path this handler answers on.
    fn endpoint(&self) -> &str;

    /// Return [`UpgradeOutcome::Ignored`] to pass the upgrade on untouched.
    async fn on_upgrade(&self, raw: RawUpgrade) -> Result<UpgradeOutcome, GatewayError>;

    /// Close every connection this handler owns.
    fn terminate(&self) -> usize;
}

pub struct UpgradeListener {
    handlers: RwLock<Vec<Arc<dyn UpgradeHandler>>>,
    router: Router,
    max_head_bytes: usize,
    head_timeout: Duration,
}

impl UpgradeListener {
    pub fn new(router: Router, config: &ServerConfig) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            router,
            max_head_bytes: config.max_head_bytes,
            head_timeout: Duration::from_millis(config.head_timeout_ms),
        }
    }

    /// Attach a handler. Two handlers may not share an endpoint.
    pub fn bind(&self, handler: Arc<dyn UpgradeHandler>) -> Result<(), GatewayError> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.iter().any(|h| h.endpoint() == handler.endpoint()) {
            return Err(GatewayError::EndpointClaimed(handler.endpoint().to_string()));
        }

        tracing::info!(endpoint = %handler.endpoint(), "Upgrade handler bound");
        handlers.push(handler);
        Ok(())
    }

    /// Detach the handler for `endpoint`. Its live connections are untouched.
    pub fn unbind(&self, endpoint: &str) -> Option<Arc<dyn UpgradeHandler>> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let index = handlers.iter().position(|h| h.endpoint() == endpoint)?;
        Some(handlers.remove(index))
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|h| h.endpoint().to_string())
            .collect()
    }

    /// Offer an upgrade to each handler in bind order. Returns `Ignored` when
    /// nobody claimed it.
    pub async fn dispatch(&self, mut raw: RawUpgrade) -> Result<UpgradeOutcome, GatewayError> {
        let handlers: Vec<_> = self.handlers.read().unwrap_or_else(|e| e.into_inner()).clone();

        for handler in handlers {
            match handler.on_upgrade(raw).await? {
                UpgradeOutcome::Ignored(back) => raw = back,
                outcome => return Ok(outcome),
            }
        }
        Ok(UpgradeOutcome::Ignored(raw))
    }

    /// Terminate the connections of every bound handler.
    pub fn terminate_all(&self) -> usize {
        let handlers: Vec<_> = self.handlers.read().unwrap_or_else(|e| e.into_inner()).clone();
        handlers.iter().map(|h| h.terminate()).sum()
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!(addr = ?listener.local_addr()?, "Listener accepting connections");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.handle_connection(stream, Some(addr)).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        tracing::info!("Listener stopped accepting connections");
        Ok(())
    }

    /// Read one request head and route the connection to a handler or to the
    /// HTTP router.
    pub async fn handle_connection<S>(&self, mut stream: S, remote_addr: Option<SocketAddr>)
    where
        S: Transport,
    {
        let head = match tokio::time::timeout(
            self.head_timeout,
            read_request_head(&mut stream, self.max_head_bytes),
        )
        .await
        {
            Ok(Ok(head)) => head,
            Ok(Err(HeadError::TooLarge(limit))) => {
                tracing::debug!(?remote_addr, limit, "Request head too large");
                reply_and_close(&mut stream, HEADERS_TOO_LARGE).await;
                return;
            }
            Ok(Err(HeadError::Malformed(reason))) => {
                tracing::debug!(?remote_addr, reason = %reason, "Malformed request head");
                reply_and_close(&mut stream, BAD_REQUEST).await;
                return;
            }
            Ok(Err(e)) => {
                tracing::trace!(?remote_addr, error = %e, "Connection ended before a request");
                return;
            }
            Err(_) => {
                tracing::debug!(?remote_addr, "Timed out reading request head");
                return;
            }
        };

        if !head.is_upgrade() {
            self.serve_http(stream, head.buffer(), remote_addr).await;
            return;
        }

        let (parts, _, leftover) = head.into_parts();
        let raw = RawUpgrade::new(UpgradeRequest::new(parts, remote_addr), Box::new(stream), leftover);

        match self.dispatch(raw).await {
            Ok(UpgradeOutcome::Ignored(mut raw)) => {
                tracing::debug!(path = %raw.request.path(), "No handler for upgrade path");
                reply_and_close(&mut raw.socket, NOT_FOUND).await;
            }
            Ok(outcome) => {
                tracing::debug!(?remote_addr, outcome = ?outcome, "Upgrade handled");
            }
            Err(e) => {
                tracing::warn!(?remote_addr, error = %e, "Upgrade failed");
            }
        }
    }

    async fn serve_http<S>(&self, stream: S, replay: bytes::Bytes, remote_addr: Option<SocketAddr>)
    where
        S: Transport,
    {
        let io = TokioIo::new(Rewind::new(stream, replay));
        let service = TowerToHyperService::new(self.router.clone());

        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
            tracing::debug!(?remote_addr, error = %e, "HTTP connection error");
        }
    }
}

async fn reply_and_close<S>(stream: &mut S, response: &[u8])
where
    S: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    if stream.write_all(response).await.is_ok() {
        let _ = stream.flush().await;
    }
    let _ = stream.shutdown().await;
}
