use serde::{Deserialize, Serialize};

/// Payload sent over an upgraded connection when a filter vetoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeError {
    pub error: String,
}

impl UpgradeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"upgrade rejected"}"#.to_string())
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// First message of a `handshake` mode connection
    Auth { access_token: String },
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth")]
    Authenticated { user_id: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_error_payload() {
        let json = UpgradeError::new("rate limited").to_json();
        assert_eq!(json, r#"{"error":"rate limited"}"#);
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"auth","access_token":"t"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Auth { access_token } if access_token == "t"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_server_message_serialization() {
        let json = ServerMessage::error("AUTH_FAILED", "bad token").to_json().unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":"AUTH_FAILED""#));
        assert_eq!(ServerMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
    }
}
