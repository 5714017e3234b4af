//! Authentication Error Types
//!
//! Centralized error handling for all authentication operations. Internal
//! variants stay distinct for logging; the HTTP mapping collapses them into a
//! small set of client-visible categories.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;
use uuid::Uuid;

/// Why a token failed validation, other than expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFault {
    /// Signature does not match the payload
    Signature,
    /// Header names an algorithm other than the expected one
    Algorithm,
    /// Not a decodable three-part token
    Malformed,
    /// Issuer, audience or another registered claim is wrong
    Claims,
    /// Valid token of the wrong kind for this use
    WrongKind,
}

impl fmt::Display for TokenFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TokenFault::Signature => "signature",
            TokenFault::Algorithm => "algorithm",
            TokenFault::Malformed => "malformed",
            TokenFault::Claims => "claims",
            TokenFault::WrongKind => "wrong_kind",
        };
        f.write_str(reason)
    }
}

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{field} is already registered")]
    Conflict { field: &'static str },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token ({0})")]
    TokenInvalid(TokenFault),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Too many requests")]
    RateLimited { retry_after: Option<u64> },

    #[error("No active one-time code")]
    OtpNotFound,

    #[error("One-time code does not match")]
    OtpMismatch,

    #[error("User not found")]
    UserNotFound,

    #[error("Account {user_id} was created but tokens could not be issued")]
    PostCreateTokenFailure { user_id: Uuid },

    #[error("Notification delivery failed: {0}")]
    NotificationFailed(String),

    #[error("Stored credential hash is malformed")]
    MalformedHash,

    #[error("Secure random source unavailable")]
    Entropy,

    #[error("Backing service unavailable: {0}")]
    Transient(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal,
}

impl AuthError {
    /// Stable machine-readable code, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_error",
            AuthError::Conflict { .. } => "conflict",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid(_) => "token_invalid",
            AuthError::Unauthorized => "unauthorized",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::OtpNotFound => "otp_not_found",
            AuthError::OtpMismatch => "otp_mismatch",
            AuthError::UserNotFound => "user_not_found",
            AuthError::PostCreateTokenFailure { .. } => "post_create_token_failure",
            AuthError::NotificationFailed(_) => "notification_failed",
            AuthError::MalformedHash => "malformed_hash",
            AuthError::Entropy => "entropy",
            AuthError::Transient(_) => "transient",
            AuthError::Config(_) => "configuration_error",
            AuthError::Internal => "internal_error",
        }
    }

    /// Whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::Transient(_) | AuthError::PostCreateTokenFailure { .. }
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AuthError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AuthError::Conflict { .. } => (StatusCode::CONFLICT, "conflict", self.to_string()),
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                self.to_string(),
            ),
            AuthError::AccountDisabled => (
                StatusCode::FORBIDDEN,
                "account_disabled",
                self.to_string(),
            ),
            // Token internals never reach the client
            AuthError::TokenExpired | AuthError::TokenInvalid(_) | AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required".to_string(),
            ),
            AuthError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.".to_string(),
            ),
            AuthError::OtpNotFound => (
                StatusCode::NOT_FOUND,
                "code_not_found",
                "No active code. Request a new one.".to_string(),
            ),
            AuthError::OtpMismatch => (
                StatusCode::BAD_REQUEST,
                "invalid_code",
                "The code is incorrect".to_string(),
            ),
            AuthError::UserNotFound => (
                StatusCode::NOT_FOUND,
                "user_not_found",
                self.to_string(),
            ),
            AuthError::PostCreateTokenFailure { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "account_created_without_session",
                "Account created but no session could be issued. Please log in.".to_string(),
            ),
            AuthError::NotificationFailed(_) => (
                StatusCode::BAD_GATEWAY,
                "delivery_failed",
                "The code could not be delivered. Please request a resend.".to_string(),
            ),
            AuthError::Transient(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "Service temporarily unavailable".to_string(),
            ),
            AuthError::MalformedHash
            | AuthError::Entropy
            | AuthError::Config(_)
            | AuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        let mut response = (
            status,
            Json(serde_json::json!({
                "error": error_code,
                "message": message
            })),
        )
            .into_response();

        if let AuthError::RateLimited {
            retry_after: Some(seconds),
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        tracing::debug!("JWT error: {:?}", err);
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidSignature => AuthError::TokenInvalid(TokenFault::Signature),
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::TokenInvalid(TokenFault::Algorithm)
            }
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => AuthError::TokenInvalid(TokenFault::Claims),
            _ => AuthError::TokenInvalid(TokenFault::Malformed),
        }
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        tracing::error!("Password hashing error: {:?}", err);
        AuthError::Internal
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for AuthError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        tracing::error!("Cache pool error: {:?}", err);
        AuthError::Transient(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for AuthError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        tracing::error!("Cache error: {:?}", err);
        AuthError::Transient(err.to_string())
    }
}

/// Every failure raised while closing collaborators, kept separate
#[derive(Debug, thiserror::Error)]
#[error("{} component(s) failed to shut down", .failures.len())]
pub struct TeardownError {
    pub failures: Vec<(&'static str, AuthError)>,
}

impl TeardownError {
    /// Collect close results; `Ok` when every component closed cleanly
    pub fn collect(
        results: impl IntoIterator<Item = (&'static str, Result<(), AuthError>)>,
    ) -> Result<(), TeardownError> {
        let failures: Vec<_> = results
            .into_iter()
            .filter_map(|(component, result)| result.err().map(|err| (component, err)))
            .collect();

        if failures.is_empty() {
            return Ok(());
        }

        for (component, err) in &failures {
            tracing::error!(component, reason = err.kind(), "Shutdown failure: {}", err);
        }
        Err(TeardownError { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_token_failures_share_one_response() {
        let expired = AuthError::TokenExpired.into_response();
        let forged = AuthError::TokenInvalid(TokenFault::Signature).into_response();

        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(expired).await, body_json(forged).await);
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AuthError::RateLimited {
            retry_after: Some(42),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[tokio::test]
    async fn test_transient_is_not_an_auth_failure() {
        let err = AuthError::Transient("connection refused".into());
        assert!(err.is_retryable());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("refused"));
    }

    #[test]
    fn test_teardown_keeps_each_failure() {
        let result = TeardownError::collect([
            ("cache", Err(AuthError::Transient("timeout".into()))),
            ("users", Ok(())),
            ("notifier", Err(AuthError::Internal)),
        ]);

        let err = result.unwrap_err();
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[0].0, "cache");
        assert_eq!(err.failures[1], ("notifier", AuthError::Internal));
    }

    #[test]
    fn test_teardown_clean() {
        assert!(TeardownError::collect([("cache", Ok(()))]).is_ok());
    }
}
