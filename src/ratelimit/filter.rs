//! Per-peer connection rate limiting, run as an upgrade filter.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{RateLimitConfig, SocketConfig};
use crate::filter::{FilterAbort, FilterHook};
use crate::metrics::RateLimitMetrics;
use crate::websocket::UpgradeRequest;

use super::TokenBucket;

pub const RATE_LIMITED: &str = "Too many connection attempts";

/// Aborts upgrades from peers that exceed `connections_per_minute`.
///
/// Requests without a known peer address are let through.
pub struct RateLimitFilter {
    buckets: DashMap<IpAddr, TokenBucket>,
    config: RateLimitConfig,
}

impl RateLimitFilter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one attempt from `ip`'s bucket. A denied attempt reports the
    /// seconds until the peer may retry.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if !self.config.enabled {
            return Ok(());
        }

        let capacity = self.config.burst.max(1);
        let per_minute = self.config.connections_per_minute;
        let bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(capacity, per_minute));
        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.retry_after())
        }
    }

    pub fn tracked_peers(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle longer than `bucket_ttl_seconds`.
    pub fn cleanup_stale(&self) -> usize {
        let ttl_ms = (self.config.bucket_ttl_seconds * 1000) as i64;
        let now = TokenBucket::now_millis();
        let before = self.buckets.len();

        self.buckets
            .retain(|_, bucket| now - bucket.last_activity() < ttl_ms);

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.buckets.len(),
                "Cleaned up stale rate limit buckets"
            );
        }
        removed
    }

    /// Run `cleanup_stale` every `cleanup_interval_seconds` until shutdown.
    pub fn spawn_cleanup(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = self.clone();
        let period = Duration::from_secs(self.config.cleanup_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        this.cleanup_stale();
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limit cleanup stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl FilterHook for RateLimitFilter {
    fn name(&self) -> &str {
        "ratelimit"
    }

    async fn filter(
        &self,
        request: UpgradeRequest,
        _config: Arc<SocketConfig>,
    ) -> Result<UpgradeRequest, FilterAbort> {
        let Some(addr) = request.remote_addr() else {
            return Ok(request);
        };

        match self.check(addr.ip()) {
            Ok(()) => {
                RateLimitMetrics::record_allowed();
                Ok(request)
            }
            Err(retry_after) => {
                RateLimitMetrics::record_denied();
                tracing::warn!(
                    ip = %addr.ip(),
                    retry_after_secs = retry_after,
                    "Connection rate limit exceeded"
                );
                Err(FilterAbort::new(RATE_LIMITED))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::net::{Ipv4Addr, SocketAddr};

    fn config(burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            connections_per_minute: 1,
            burst,
            ..Default::default()
        }
    }

    fn request_from(ip: [u8; 4]) -> UpgradeRequest {
        UpgradeRequest::from_request(Request::builder().uri("/websocket").body(()).unwrap())
            .with_remote_addr(SocketAddr::from((Ipv4Addr::from(ip), 40000)))
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = RateLimitFilter::new(RateLimitConfig::default());
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        for _ in 0..100 {
            assert!(limiter.check(ip).is_ok());
        }
        assert_eq!(limiter.tracked_peers(), 0);
    }

    #[tokio::test]
    async fn test_filter_aborts_after_burst() {
        let limiter = RateLimitFilter::new(config(2));
        let socket = Arc::new(SocketConfig::default());

        assert!(limiter.filter(request_from([10, 0, 0, 1]), socket.clone()).await.is_ok());
        assert!(limiter.filter(request_from([10, 0, 0, 1]), socket.clone()).await.is_ok());

        let abort = limiter
            .filter(request_from([10, 0, 0, 1]), socket.clone())
            .await
            .unwrap_err();
        assert_eq!(abort.reason, RATE_LIMITED);

        // Other peers have their own bucket
        assert!(limiter.filter(request_from([10, 0, 0, 2]), socket).await.is_ok());
        assert_eq!(limiter.tracked_peers(), 2);
    }

    #[test]
    fn test_denied_check_reports_retry_after() {
        let limiter = RateLimitFilter::new(config(1));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));

        assert_eq!(limiter.check(ip), Ok(()));
        // One connection per minute
        assert_eq!(limiter.check(ip), Err(60));
    }

    #[tokio::test]
    async fn test_unknown_peer_passes() {
        let limiter = RateLimitFilter::new(config(1));
        for _ in 0..5 {
            let request = UpgradeRequest::from_request(
                Request::builder().uri("/websocket").body(()).unwrap(),
            );
            assert!(limiter
                .filter(request, Arc::new(SocketConfig::default()))
                .await
                .is_ok());
        }
    }

    #[test]
    fn test_cleanup_stale() {
        let limiter = RateLimitFilter::new(RateLimitConfig {
            bucket_ttl_seconds: 0,
            ..config(5)
        });
        assert!(limiter.check(IpAddr::V4(Ipv4Addr::LOCALHOST)).is_ok());
        assert_eq!(limiter.tracked_peers(), 1);
        assert_eq!(limiter.cleanup_stale(), 1);
        assert_eq!(limiter.tracked_peers(), 0);
    }
}
