use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::connection_manager::RegistryError;
use crate::websocket::NegotiationError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(Uuid),

    #[error("Endpoint already claimed: {0}")]
    EndpointClaimed(String),

    #[error("Handshake failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            GatewayError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            GatewayError::ConnectionNotFound(_) => (StatusCode::NOT_FOUND, "CONNECTION_NOT_FOUND"),
            GatewayError::EndpointClaimed(_) => (StatusCode::CONFLICT, "ENDPOINT_CLAIMED"),
            GatewayError::Negotiation(_) => (StatusCode::BAD_REQUEST, "HANDSHAKE_FAILED"),
            GatewayError::Registry(_) => (StatusCode::CONFLICT, "REGISTRY_ERROR"),
            GatewayError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };

        let log_message = self.to_string();
        let client_message = if is_production() && status.is_server_error() {
            "Internal server error".to_string()
        } else {
            log_message.clone()
        };

        // Always log the detailed error server-side
        if status.is_server_error() {
            tracing::error!(code = %code, status = %status.as_u16(), message = %log_message, "API error");
        } else {
            tracing::warn!(code = %code, status = %status.as_u16(), message = %log_message, "API error");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(error: GatewayError) -> (StatusCode, serde_json::Value) {
        let resp = error.into_response();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_client_errors_keep_message() {
        let id = Uuid::new_v4();
        let (status, body) = body_json(GatewayError::ConnectionNotFound(id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");
        assert_eq!(body["error"]["message"], format!("Connection not found: {id}"));

        let (status, body) = body_json(GatewayError::Unauthorized("missing API key")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_endpoint_claimed_is_conflict() {
        let (status, body) = body_json(GatewayError::EndpointClaimed("/ws".to_string())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ENDPOINT_CLAIMED");
    }
}
