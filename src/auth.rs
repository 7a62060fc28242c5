use crate::error::{AppError, Result};
use crate::idempotency::sha256_hex;
use crate::observability::mask_token;
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Identity {
    pub user_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Resolves session tokens to callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with `Unauthorized` for unknown tokens and `SessionExpired` for stale ones.
    async fn authenticate(&self, token: &str) -> Result<Identity>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticates the request or fails with the matching 401 error.
pub async fn authenticate(
    provider: &dyn IdentityProvider,
    headers: &HeaderMap,
) -> Result<Identity> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    provider.authenticate(token).await
}

/// Session lookup backed by the `user_sessions` table. Only token hashes are stored.
pub struct PostgresIdentityProvider {
    pool: PgPool,
}

impl PostgresIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PostgresIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Identity> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT user_id, expires_at
            FROM user_sessions
            WHERE token_hash = $1
            "#,
        )
        .bind(sha256_hex(token.as_bytes()))
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        match identity {
            Some(identity) if identity.is_expired_at(Utc::now()) => Err(AppError::SessionExpired),
            Some(identity) => Ok(identity),
            None => {
                tracing::debug!(token = %mask_token(token), "unknown session token");
                Err(AppError::Unauthorized("Invalid session token".to_string()))
            }
        }
    }
}

/// In-memory sessions for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    sessions: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(
        self,
        token: impl Into<String>,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.insert(token, user_id, expires_at);
        self
    }

    pub fn insert(
        &self,
        token: impl Into<String>,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(token.into(), Identity { user_id, expires_at });
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Identity> {
        let identity = self
            .sessions
            .read()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("session table lock poisoned")))?
            .get(token)
            .cloned();

        match identity {
            Some(identity) if identity.is_expired_at(Utc::now()) => Err(AppError::SessionExpired),
            Some(identity) => Ok(identity),
            None => Err(AppError::Unauthorized("Invalid session token".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_static_provider() {
        let user = Uuid::new_v4();
        let provider = StaticIdentityProvider::new()
            .with_session("live", user, None)
            .with_session("stale", user, Some(Utc::now() - Duration::minutes(1)));

        assert_eq!(provider.authenticate("live").await.unwrap().user_id, user);
        assert!(matches!(
            provider.authenticate("stale").await,
            Err(AppError::SessionExpired)
        ));
        assert!(matches!(
            provider.authenticate("nope").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let provider = StaticIdentityProvider::new();
        let result = tokio_test::block_on(authenticate(&provider, &HeaderMap::new()));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_authenticate_passes_token_to_provider() {
        let user = Uuid::new_v4();
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_authenticate()
            .withf(|token| token == "abc")
            .times(1)
            .returning(move |_| {
                Ok(Identity {
                    user_id: user,
                    expires_at: None,
                })
            });

        let identity = authenticate(&provider, &headers_with("Bearer abc")).await.unwrap();
        assert_eq!(identity.user_id, user);
    }

    #[tokio::test]
    async fn test_authenticate_surfaces_provider_failure() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_authenticate()
            .returning(|_| Err(AppError::Database(sqlx::Error::PoolTimedOut)));

        let result = authenticate(&provider, &headers_with("Bearer abc")).await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }
}
