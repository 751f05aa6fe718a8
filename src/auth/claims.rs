use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::AccountabilityContext;

/// Role that grants administrative access
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default)]
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// User roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// Tenant ID for multi-tenancy support
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}

impl From<Claims> for AccountabilityContext {
    fn from(claims: Claims) -> Self {
        let admin = claims.has_role(ADMIN_ROLE);
        let user = Some(claims.sub).filter(|sub| !sub.trim().is_empty());
        Self {
            user,
            roles: claims.roles,
            admin,
            tenant_id: claims.tenant_id,
            expires_at: chrono::DateTime::from_timestamp(claims.exp, 0),
            extra: claims.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, roles: &[&str]) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + 60,
            iat: chrono::Utc::now().timestamp(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            tenant_id: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn test_claims_into_context() {
        let ctx = AccountabilityContext::from(claims("user-1", &["admin", "user"]));
        assert_eq!(ctx.user.as_deref(), Some("user-1"));
        assert!(ctx.admin);
        assert!(ctx.has_identity());
        assert!(ctx.expires_at.is_some());
    }

    #[test]
    fn test_blank_subject_has_no_identity() {
        let ctx = AccountabilityContext::from(claims("  ", &["user"]));
        assert!(ctx.user.is_none());
        assert!(!ctx.has_identity());
        assert!(!ctx.admin);
    }
}
