//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    AUTH_REJECTIONS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TERMINATED_TOTAL, CONNECTION_DURATION,
    FILTER_ABORTS_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS, RATELIMIT_ALLOWED_TOTAL,
    RATELIMIT_DENIED_TOTAL, UPGRADES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording upgrade outcomes
pub struct UpgradeMetrics;

impl UpgradeMetrics {
    pub fn record_outcome(outcome: &str) {
        UPGRADES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_auth_rejection(reason: &str) {
        AUTH_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_filter_abort() {
        FILTER_ABORTS_TOTAL.inc();
    }
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_registered() {
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_unregistered() {
        CONNECTIONS_ACTIVE.dec();
    }

    pub fn record_terminated() {
        CONNECTIONS_TERMINATED_TOTAL.inc();
    }

    pub fn record_duration(seconds: f64) {
        CONNECTION_DURATION.observe(seconds);
    }
}

/// Helper struct for recording rate limit metrics
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn record_allowed() {
        RATELIMIT_ALLOWED_TOTAL.inc();
    }

    pub fn record_denied() {
        RATELIMIT_DENIED_TOTAL.inc();
    }
}

/// Helper struct for recording heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration(duration_ms: f64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms);
    }

    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }
}
