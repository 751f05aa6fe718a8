// Ambient layer (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Upgrade path
pub mod auth;
pub mod connection_manager;
pub mod filter;
pub mod ratelimit;
pub mod websocket;

// Serving layer
pub mod api;
pub mod server;

// Supporting modules
pub mod tasks;
