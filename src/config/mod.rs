mod settings;

pub use settings::{
    ApiConfig, AuthConfig, AuthMode, JwtConfig, OtelConfig, RateLimitConfig, ServerConfig,
    Settings, SocketConfig, WebSocketConfig,
};
