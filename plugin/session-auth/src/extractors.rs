//! Authentication Extractors
//!
//! Typed access to the identity attached by
//! [`require_auth`](crate::middleware::require_auth).

use crate::error::AuthError;
use crate::models::VerifiedIdentity;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::ops::Deref;

/// The authenticated user of the current request
#[derive(Debug, Clone)]
pub struct AuthUser(pub VerifiedIdentity);

impl Deref for AuthUser {
    type Target = VerifiedIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedIdentity>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| {
                tracing::error!(path = %parts.uri.path(), "AuthUser requested on a route without require_auth");
                AuthError::Unauthorized
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use uuid::Uuid;

    fn identity() -> VerifiedIdentity {
        VerifiedIdentity {
            id: Uuid::new_v4(),
            email: "alice@example.com".into(),
            username: "alice".into(),
            first_name: String::new(),
            last_name: String::new(),
            token_expires_at: 0,
        }
    }

    #[tokio::test]
    async fn test_reads_identity_from_extensions() {
        let expected = identity();
        let (mut parts, _) = Request::builder()
            .uri("/auth/me")
            .extension(expected.clone())
            .body(())
            .unwrap()
            .into_parts();

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.0, expected);
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let (mut parts, _) = Request::builder()
            .uri("/auth/me")
            .body(())
            .unwrap()
            .into_parts();

        assert_eq!(
            AuthUser::from_request_parts(&mut parts, &()).await.unwrap_err(),
            AuthError::Unauthorized
        );
    }
}
