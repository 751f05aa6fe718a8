//! Prometheus metrics for the gateway.
//!
//! - Upgrade outcomes and authentication rejections
//! - Connection lifecycle (active, terminated, duration)
//! - Rate limiting and heartbeat metrics

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, HeartbeatMetrics, RateLimitMetrics, UpgradeMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "gateway";

lazy_static! {
    // ============================================================================
    // Upgrade Metrics
    // ============================================================================

    /// Upgrade attempts by outcome (accepted, rejected, filtered, abandoned, failed)
    pub static ref UPGRADES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_upgrades_total", METRIC_PREFIX),
        "Upgrade attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Authentication rejections by reason
    pub static ref AUTH_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_auth_rejections_total", METRIC_PREFIX),
        "Upgrade requests rejected by the authentication gate",
        &["reason"]
    ).unwrap();

    /// Upgrades vetoed by a filter hook
    pub static ref FILTER_ABORTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_filter_aborts_total", METRIC_PREFIX),
        "Upgrades aborted by a filter hook after the handshake"
    ).unwrap();

    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Registered connections across all controllers
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered connections"
    ).unwrap();

    /// Connections force-closed by termination
    pub static ref CONNECTIONS_TERMINATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_terminated_total", METRIC_PREFIX),
        "Connections closed without a close handshake"
    ).unwrap();

    /// Connection lifetime
    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Rate Limiting Metrics
    // ============================================================================

    /// Upgrades allowed by the rate limit filter
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Upgrades allowed by the rate limiter"
    ).unwrap();

    /// Upgrades denied by the rate limit filter
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Upgrades denied by the rate limiter"
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Time to send one round of heartbeats
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    /// Connections terminated for inactivity
    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Connections terminated for inactivity"
    ).unwrap();
}
