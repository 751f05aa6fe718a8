use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{AuthConfig, AuthMode};
use crate::metrics::UpgradeMetrics;
use crate::websocket::UpgradeRequest;

use super::{extract_token, AccountabilityResolver, ResolveError};

/// Why an upgrade request failed authentication.
///
/// Every variant produces the same `401` on the wire; the distinction only
/// shows up in logs and metrics.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthRejection {
    #[error("no credential supplied")]
    MissingCredential,

    #[error("credential rejected: {0}")]
    InvalidCredential(#[from] ResolveError),

    #[error("credential resolved without an identity")]
    Anonymous,
}

impl AuthRejection {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthRejection::MissingCredential => "missing",
            AuthRejection::InvalidCredential(ResolveError::Expired) => "expired",
            AuthRejection::InvalidCredential(ResolveError::Unavailable(_)) => "resolver_error",
            AuthRejection::InvalidCredential(ResolveError::Invalid(_)) => "invalid",
            AuthRejection::Anonymous => "anonymous",
        }
    }
}

/// Decides whether an upgrade request may proceed under the configured mode.
pub struct AuthenticationGate {
    mode: AuthMode,
    resolve_timeout: Duration,
    resolver: Arc<dyn AccountabilityResolver>,
}

impl AuthenticationGate {
    pub fn new(config: &AuthConfig, resolver: Arc<dyn AccountabilityResolver>) -> Self {
        Self {
            mode: config.mode,
            resolve_timeout: Duration::from_millis(config.resolve_timeout_ms),
            resolver,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Authenticate `request`, attaching the resolved context on success.
    ///
    /// `handshake` and `public` accept without looking at credentials. In
    /// `handshake` mode the application loop owns the authentication step.
    pub async fn authenticate(&self, request: &mut UpgradeRequest) -> Result<(), AuthRejection> {
        match self.mode {
            AuthMode::Public | AuthMode::Handshake => Ok(()),
            AuthMode::Strict => {
                let result = self.authenticate_strict(request).await;
                if let Err(ref rejection) = result {
                    UpgradeMetrics::record_auth_rejection(rejection.reason());
                    match rejection {
                        AuthRejection::MissingCredential => {
                            tracing::debug!(path = %request.path(), "Upgrade denied: no credential");
                        }
                        _ => {
                            tracing::warn!(
                                path = %request.path(),
                                reason = rejection.reason(),
                                error = %rejection,
                                "Upgrade denied"
                            );
                        }
                    }
                }
                result
            }
        }
    }

    async fn authenticate_strict(&self, request: &mut UpgradeRequest) -> Result<(), AuthRejection> {
        let token = extract_token(request.parts()).ok_or(AuthRejection::MissingCredential)?;

        let accountability =
            match tokio::time::timeout(self.resolve_timeout, self.resolver.resolve(&token)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ResolveError::Unavailable("resolution timed out".to_string()).into())
                }
            };

        if !accountability.has_identity() {
            return Err(AuthRejection::Anonymous);
        }

        tracing::debug!(
            user_id = accountability.user.as_deref().unwrap_or_default(),
            "Upgrade authenticated"
        );
        request.attach_accountability(accountability);
        Ok(())
    }
}
