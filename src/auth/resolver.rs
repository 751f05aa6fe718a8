use async_trait::async_trait;
use thiserror::Error;

use super::AccountabilityContext;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("credential expired")]
    Expired,

    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("resolver unavailable: {0}")]
    Unavailable(String),
}

/// Turns a raw bearer credential into an accountability context.
///
/// Implementations may suspend (signature checks, remote lookups). Callers
/// treat every error as "not authenticated".
#[async_trait]
pub trait AccountabilityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<AccountabilityContext, ResolveError>;
}
