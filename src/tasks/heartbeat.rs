use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::metrics::HeartbeatMetrics;

/// Timeout for individual heartbeat send operations
const HEARTBEAT_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent heartbeat sends to avoid overwhelming the system
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Background task that pings registered connections and terminates idle ones.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup tasks
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a ping on every connection, in parallel batches
    async fn send_heartbeats(&self) {
        let connections = self.registry.get_all_connections();
        let total_count = connections.len();

        if total_count == 0 {
            return;
        }

        let start = Instant::now();
        let sent = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let timed_out = AtomicUsize::new(0);

        for batch in connections.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let futures = batch.iter().map(|handle| {
                let (sent, failed, timed_out) = (&sent, &failed, &timed_out);
                async move {
                    let send_timeout = Duration::from_millis(HEARTBEAT_SEND_TIMEOUT_MS);
                    match timeout(send_timeout, handle.send(Message::Ping(Default::default()))).await {
                        Ok(Ok(())) => {
                            sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(_)) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                connection_id = %handle.id,
                                "Failed to send heartbeat, connection may be dead"
                            );
                        }
                        Err(_) => {
                            timed_out.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                connection_id = %handle.id,
                                timeout_ms = HEARTBEAT_SEND_TIMEOUT_MS,
                                "Heartbeat send timed out"
                            );
                        }
                    }
                }
            });

            join_all(futures).await;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let timed_out_count = timed_out.load(Ordering::Relaxed);

        HeartbeatMetrics::record_duration(elapsed_ms as f64);
        if timed_out_count > 0 {
            HeartbeatMetrics::record_timeouts(timed_out_count as u64);
        }

        tracing::debug!(
            total = total_count,
            sent = sent.load(Ordering::Relaxed),
            failed = failed.load(Ordering::Relaxed),
            timed_out = timed_out_count,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total_count,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }

    /// Terminate connections idle for longer than `timeout_secs`
    fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let removed = self
            .registry
            .find_stale_connections(timeout_secs)
            .into_iter()
            .filter(|handle| self.registry.terminate(handle.id))
            .count();

        if removed > 0 {
            tracing::info!(
                removed = removed,
                timeout_secs = timeout_secs,
                "Terminated stale connections"
            );
        }
        removed
    }
}
