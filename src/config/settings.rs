use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for an inbound request head, in bytes
    #[serde(default = "default_max_head_bytes")]
    pub max_head_bytes: usize,
    /// Time allowed for a client to send its request head
    #[serde(default = "default_head_timeout_ms")]
    pub head_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Clock skew tolerated when checking `exp`, in seconds
    #[serde(default)]
    pub leeway: u64,
}

/// Authentication policy applied by an upgrade controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Credential must be presented with the upgrade request.
    #[default]
    Strict,
    /// Credential is exchanged in the first message after the handshake.
    Handshake,
    /// No authentication.
    Public,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Strict => "strict",
            AuthMode::Handshake => "handshake",
            AuthMode::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Seconds a `handshake` mode connection has to authenticate
    #[serde(default = "default_auth_timeout")]
    pub timeout: u64,
    /// Upper bound on a single credential resolution
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

/// Configuration of one upgrade controller. Never mutated after construction.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Path claimed exclusively on the shared listener
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sustained upgrade attempts per peer per minute
    #[serde(default = "default_connections_per_minute")]
    pub connections_per_minute: u32,
    /// Attempts allowed in a burst before throttling
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_ratelimit_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Idle buckets older than this are dropped
    #[serde(default = "default_bucket_ttl")]
    pub bucket_ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit logs as JSON lines instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_max_head_bytes() -> usize {
    16 * 1024
}

fn default_head_timeout_ms() -> u64 {
    5000
}

fn default_endpoint() -> String {
    "/websocket".to_string()
}

fn default_auth_timeout() -> u64 {
    10
}

fn default_resolve_timeout_ms() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_connections_per_minute() -> u32 {
    60
}

fn default_burst() -> u32 {
    10
}

fn default_ratelimit_cleanup_interval() -> u64 {
    60
}

fn default_bucket_ttl() -> u64 {
    300
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "upgrade-gateway".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("socket.endpoint", "/websocket")?
            .set_default("socket.auth.mode", "strict")?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.connection_timeout", 120)?
            .set_default("websocket.cleanup_interval", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_PORT, JWT_SECRET, SOCKET_ENDPOINT, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_head_bytes: default_max_head_bytes(),
            head_timeout_ms: default_head_timeout_ms(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            timeout: default_auth_timeout(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            auth: AuthConfig::default(),
        }
    }
}

impl SocketConfig {
    /// Config for `endpoint` with the given mode and default timeouts.
    pub fn new(endpoint: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: AuthConfig {
                mode,
                ..AuthConfig::default()
            },
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connections_per_minute: default_connections_per_minute(),
            burst: default_burst(),
            cleanup_interval_seconds: default_ratelimit_cleanup_interval(),
            bucket_ttl_seconds: default_bucket_ttl(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);
        assert_eq!(server.max_head_bytes, 16 * 1024);
    }

    #[test]
    fn test_socket_defaults() {
        let socket = SocketConfig::default();
        assert_eq!(socket.endpoint, "/websocket");
        assert_eq!(socket.auth.mode, AuthMode::Strict);
        assert_eq!(socket.auth.timeout, 10);
    }

    #[test]
    fn test_auth_mode_deserializes_lowercase() {
        let auth: AuthConfig = serde_json::from_str(r#"{"mode":"handshake"}"#).unwrap();
        assert_eq!(auth.mode, AuthMode::Handshake);
        assert_eq!(auth.resolve_timeout_ms, 5000);

        let auth: AuthConfig = serde_json::from_str(r#"{"mode":"public","timeout":3}"#).unwrap();
        assert_eq!(auth.mode, AuthMode::Public);
        assert_eq!(auth.timeout, 3);

        assert!(serde_json::from_str::<AuthConfig>(r#"{"mode":"open"}"#).is_err());
    }
}
