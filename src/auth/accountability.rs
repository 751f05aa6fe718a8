use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Identity and authorization facts resolved from a credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountabilityContext {
    /// Authenticated user, `None` for an anonymous context
    pub user: Option<String>,
    pub roles: Vec<String>,
    pub admin: bool,
    pub tenant_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AccountabilityContext {
    /// Context for an authenticated user with no roles.
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::default()
        }
    }

    pub fn has_identity(&self) -> bool {
        self.user.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
