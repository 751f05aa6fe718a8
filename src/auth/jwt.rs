use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};

use crate::config::JwtConfig;

use super::{AccountabilityContext, AccountabilityResolver, Claims, ResolveError};

/// Resolves HS256 JWTs issued with the shared secret.
pub struct JwtResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtResolver {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();
        validation.leeway = config.leeway;

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, ResolveError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ResolveError::Expired,
                _ => ResolveError::Invalid(e.to_string()),
            })?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl AccountabilityResolver for JwtResolver {
    async fn resolve(&self, credential: &str) -> Result<AccountabilityContext, ResolveError> {
        self.validate(credential).map(AccountabilityContext::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
            leeway: 0,
        }
    }

    fn create_test_token(sub: &str, exp_offset: i64, secret: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            exp: now + exp_offset,
            iat: now,
            roles: vec!["user".to_string()],
            tenant_id: None,
            extra: Default::default(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let config = create_test_config();
        let resolver = JwtResolver::new(&config);

        let token = create_test_token("user-123", 3600, &config.secret);
        let ctx = resolver.resolve(&token).await.unwrap();

        assert_eq!(ctx.user.as_deref(), Some("user-123"));
        assert!(ctx.has_role("user"));
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let resolver = JwtResolver::new(&create_test_config());

        let result = resolver.resolve("invalid-token").await;
        assert!(matches!(result, Err(ResolveError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let config = create_test_config();
        let resolver = JwtResolver::new(&config);

        let token = create_test_token("user-123", -3600, &config.secret);
        assert_eq!(resolver.resolve(&token).await, Err(ResolveError::Expired));
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let resolver = JwtResolver::new(&create_test_config());

        let token = create_test_token("user-123", 3600, "another-secret");
        assert!(matches!(
            resolver.resolve(&token).await,
            Err(ResolveError::Invalid(_))
        ));
    }
}
