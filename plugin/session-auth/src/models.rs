//! Authentication Models
//!
//! User records, token claims, request and response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

// ============================================
// User Records
// ============================================

/// User record as held by the external user store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical form for email lookups and OTP owner keys
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================
// Token Claims
// ============================================

/// Token type tag carried inside every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity a token is minted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub id: Uuid,
    pub email: String,
    pub username: String,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

/// Signed identity claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    /// Access or refresh
    pub kind: TokenKind,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// JWT ID (unique identifier)
    pub jti: Uuid,
}

/// Identity resolved for a single request by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// Expiry of the presented access token
    #[serde(skip)]
    pub token_expires_at: i64,
}

impl VerifiedIdentity {
    pub fn new(user: &User, claims: &IdentityClaims) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            token_expires_at: claims.exp,
        }
    }
}

// ============================================
// Request DTOs
// ============================================

/// Registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[serde(default)]
    #[validate(length(max = 100, message = "First name must be at most 100 characters"))]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(max = 100, message = "Last name must be at most 100 characters"))]
    pub last_name: String,
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Refresh token request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Ask for a one-time code to be sent to an address
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

/// Redeem a one-time code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpVerifyRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(
        length(min = 4, max = 10, message = "Code must be 4-10 digits"),
        custom(function = "validate_code_digits")
    )]
    pub code: String,
}

fn validate_code_digits(code: &str) -> Result<(), ValidationError> {
    if code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("digits").with_message("Code must be 4-10 digits".into()))
    }
}

// ============================================
// Response DTOs
// ============================================

/// User response (public user data without sensitive fields)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

/// Authentication response with tokens
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Token refresh response
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Result of a password check
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    /// Tokens issued
    Authenticated(AuthResponse),
    /// A code was mailed; finish with the login verification step
    OtpRequired { expires_in: u64 },
}

/// One-time code issuance acknowledgement
#[derive(Debug, Clone, Serialize)]
pub struct OtpIssuedResponse {
    pub message: String,
    pub expires_in: u64,
}

/// Simple message response
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_kind_wire_format() {
        assert_eq!(serde_json::to_string(&TokenKind::Refresh).unwrap(), "\"refresh\"");
        assert_eq!(
            serde_json::from_str::<TokenKind>("\"access\"").unwrap(),
            TokenKind::Access
        );
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "alice@example.com".into(),
            username: "alice".into(),
            password_hash: "c2FsdA==$ZGlnZXN0".into(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_otp_code_validation() {
        let ok = OtpVerifyRequest {
            email: "bob@example.com".into(),
            code: "012345".into(),
        };
        assert!(ok.validate().is_ok());

        for bad in ["123", "12a456", "12 456", "１２３４５６"] {
            let req = OtpVerifyRequest {
                code: bad.into(),
                ..ok.clone()
            };
            assert!(req.validate().is_err(), "code {bad:?}");
        }
    }

    #[test]
    fn test_login_outcome_is_tagged() {
        let json = serde_json::to_value(LoginOutcome::OtpRequired { expires_in: 300 }).unwrap();
        assert_eq!(json["status"], "otp_required");
        assert_eq!(json["expires_in"], 300);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
