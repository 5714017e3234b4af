//! Authentication Middleware
//!
//! Turns an `Authorization: Bearer <token>` header into a [`VerifiedIdentity`]
//! stored in the request extensions. Every rejection reaches the client as the
//! same `401 unauthorized` body; the internal reason is only logged.

use crate::error::AuthError;
use crate::models::{TokenKind, VerifiedIdentity};
use crate::store::{UserLookup, UserStore};
use crate::token::TokenService;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

const BEARER_PREFIX: &str = "Bearer ";

/// Resolves bearer credentials to active users
#[derive(Clone)]
pub struct RequestAuthenticator {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserStore>,
}

impl RequestAuthenticator {
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }

    /// Resolve a raw `Authorization` header value, keeping the failure reason
    pub async fn inspect(&self, header: Option<&str>) -> Result<VerifiedIdentity, AuthError> {
        let header = header.ok_or_else(|| {
            tracing::debug!(reason = "missing_header", "No credentials presented");
            AuthError::Unauthorized
        })?;

        let token = header
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                tracing::debug!(reason = "bad_scheme", "Authorization header is not a bearer token");
                AuthError::Unauthorized
            })?;

        let claims = self.tokens.validate_kind(token, TokenKind::Access)?;

        let user = self
            .users
            .find(UserLookup::Id(claims.sub))
            .await?
            .ok_or_else(|| {
                tracing::debug!(user_id = %claims.sub, reason = "unknown_subject", "Token subject no longer exists");
                AuthError::Unauthorized
            })?;

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        Ok(VerifiedIdentity::new(&user, &claims))
    }

    /// Resolve a raw `Authorization` header value for a protected request
    ///
    /// All authentication failures collapse into `Unauthorized`. A store
    /// outage stays `Transient` so clients can retry instead of logging out.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<VerifiedIdentity, AuthError> {
        self.inspect(header).await.map_err(|err| match err {
            AuthError::Transient(_) => err,
            AuthError::AccountDisabled => {
                tracing::info!(reason = err.kind(), "Request rejected for disabled account");
                AuthError::Unauthorized
            }
            other => {
                tracing::debug!(reason = other.kind(), detail = %other, "Request authentication failed");
                AuthError::Unauthorized
            }
        })
    }
}

/// Require an authenticated, active user
///
/// Stores the [`VerifiedIdentity`] in request extensions for the
/// [`AuthUser`](crate::extractors::AuthUser) extractor.
pub async fn require_auth(
    State(authenticator): State<Arc<RequestAuthenticator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    let identity = authenticator.authenticate(header.as_deref()).await?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
