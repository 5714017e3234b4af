//! Authentication Service
//!
//! Registration, login, one-time code exchanges and token refresh, coordinated
//! over the user store, the credential hasher, the token service and the OTP
//! service.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::hasher::CredentialHasher;
use crate::middleware::RequestAuthenticator;
use crate::models::*;
use crate::otp::{OtpPurpose, OtpService};
use crate::store::{UserLookup, UserStore};
use crate::token::{TokenPair, TokenService};

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Well-formed record verified when the login email is unknown, so both
/// failure paths pay for one Argon2 run
const UNKNOWN_USER_RECORD: &str =
    "AAAAAAAAAAAAAAAAAAAAAA==$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Authentication service
pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    tokens: Arc<TokenService>,
    otp: Arc<OtpService>,
    config: AuthConfig,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        otp: Arc<OtpService>,
    ) -> Self {
        Self {
            users,
            hasher: CredentialHasher::new(),
            tokens,
            otp,
            config,
        }
    }

    /// Get reference to config
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn otp(&self) -> &Arc<OtpService> {
        &self.otp
    }

    /// Request pipeline sharing this service's token service and user store
    pub fn authenticator(&self) -> RequestAuthenticator {
        RequestAuthenticator::new(self.tokens.clone(), self.users.clone())
    }

    // ============================================
    // Password Policy
    // ============================================

    /// Validate password strength
    pub fn validate_password(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.config.min_password_length {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            )));
        }

        let has_uppercase = password.chars().any(|c| c.is_uppercase());
        let has_lowercase = password.chars().any(|c| c.is_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());

        if !has_uppercase || !has_lowercase || !has_digit {
            return Err(AuthError::Validation(
                "Password must contain uppercase, lowercase, and a number".to_string(),
            ));
        }

        Ok(())
    }

    // ============================================
    // Registration
    // ============================================

    /// Register a new user and open a session
    ///
    /// If the account is stored but tokens cannot be issued, fails with
    /// `PostCreateTokenFailure`; the account stays and
    /// [`issue_session`](Self::issue_session) can be retried for it.
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        req.validate()?;
        self.validate_password(&req.password)?;

        let email = normalize_email(&req.email);
        let username = req.username.trim().to_string();

        if self.users.find(UserLookup::Email(&email)).await?.is_some() {
            return Err(AuthError::Conflict { field: "email" });
        }
        if self
            .users
            .find(UserLookup::Username(&username))
            .await?
            .is_some()
        {
            return Err(AuthError::Conflict { field: "username" });
        }

        let password_hash = self.hasher.hash_blocking(req.password).await?;

        let now = Utc::now();
        let user = self
            .users
            .create(User {
                id: Uuid::new_v4(),
                email,
                username,
                password_hash,
                first_name: req.first_name.trim().to_string(),
                last_name: req.last_name.trim().to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(user_id = %user.id, "User registered");

        let pair = self.tokens.issue_pair(&TokenSubject::from(&user)).map_err(|err| {
            tracing::error!(user_id = %user.id, reason = err.kind(), "Tokens could not be issued for new account");
            AuthError::PostCreateTokenFailure { user_id: user.id }
        })?;

        Ok(auth_response(&user, pair))
    }

    /// Issue tokens for an existing, active account
    pub async fn issue_session(&self, user_id: Uuid) -> Result<AuthResponse, AuthError> {
        let user = self
            .users
            .find(UserLookup::Id(user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let pair = self.tokens.issue_pair(&TokenSubject::from(&user))?;
        Ok(auth_response(&user, pair))
    }

    // ============================================
    // Login
    // ============================================

    /// Check email and password
    ///
    /// An unknown email and a wrong password fail identically with
    /// `InvalidCredentials`. With `REQUIRE_LOGIN_OTP` set, a code is mailed
    /// and the login completes through [`verify_login_otp`](Self::verify_login_otp).
    pub async fn login(&self, req: LoginRequest) -> Result<LoginOutcome, AuthError> {
        req.validate()?;

        let user = self.check_credentials(&req.email, req.password).await?;

        if self.config.require_login_otp {
            let issued = self.otp.generate(&user.email, OtpPurpose::Login).await?;
            tracing::info!(user_id = %user.id, "Password accepted, awaiting login code");
            return Ok(LoginOutcome::OtpRequired {
                expires_in: issued.expires_in().as_secs(),
            });
        }

        let pair = self.tokens.issue_pair(&TokenSubject::from(&user))?;
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(LoginOutcome::Authenticated(auth_response(&user, pair)))
    }

    /// Finish an OTP-gated login
    ///
    /// A missing, expired or wrong code is `Unauthorized`.
    pub async fn verify_login_otp(&self, email: &str, code: &str) -> Result<AuthResponse, AuthError> {
        let email = normalize_email(email);

        match self.otp.redeem(&email, OtpPurpose::Login, code).await {
            Ok(()) => {}
            Err(AuthError::OtpNotFound | AuthError::OtpMismatch) => {
                tracing::debug!(owner = %email, "Login code rejected");
                return Err(AuthError::Unauthorized);
            }
            Err(err) => return Err(err),
        }

        let user = self
            .users
            .find(UserLookup::Email(&email))
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let pair = self.tokens.issue_pair(&TokenSubject::from(&user))?;
        tracing::info!(user_id = %user.id, "User logged in with one-time code");

        Ok(auth_response(&user, pair))
    }

    async fn check_credentials(&self, email: &str, password: String) -> Result<User, AuthError> {
        let email = normalize_email(email);

        let Some(user) = self.users.find(UserLookup::Email(&email)).await? else {
            let _ = self
                .hasher
                .verify_blocking(password, UNKNOWN_USER_RECORD.to_string())
                .await;
            tracing::debug!(reason = "unknown_email", "Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login attempt on disabled account");
            return Err(AuthError::AccountDisabled);
        }

        if !self
            .hasher
            .verify_blocking(password, user.password_hash.clone())
            .await?
        {
            tracing::debug!(user_id = %user.id, reason = "wrong_password", "Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    // ============================================
    // One-Time Codes
    // ============================================

    /// Mail a verification code to `email`
    pub async fn request_otp(&self, email: &str) -> Result<OtpIssuedResponse, AuthError> {
        let issued = self.otp.generate(email, OtpPurpose::Verification).await?;

        Ok(OtpIssuedResponse {
            message: "Verification code sent".to_string(),
            expires_in: issued.expires_in().as_secs(),
        })
    }

    /// Mail the outstanding verification code again
    pub async fn resend_otp(&self, email: &str) -> Result<OtpIssuedResponse, AuthError> {
        let remaining = self.otp.resend(email, OtpPurpose::Verification).await?;

        Ok(OtpIssuedResponse {
            message: "Verification code resent".to_string(),
            expires_in: remaining.as_secs(),
        })
    }

    /// Redeem a verification code
    pub async fn redeem_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        self.otp.redeem(email, OtpPurpose::Verification, code).await
    }

    // ============================================
    // Token Refresh
    // ============================================

    /// Exchange a refresh token for a fresh token pair
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let claims = self.tokens.validate_kind(refresh_token, TokenKind::Refresh)?;

        let user = self
            .users
            .find(UserLookup::Id(claims.sub))
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let pair = self.tokens.issue_pair(&TokenSubject::from(&user))?;
        tracing::debug!(user_id = %user.id, "Tokens refreshed");

        Ok(TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
        })
    }
}

fn auth_response(user: &User, pair: TokenPair) -> AuthResponse {
    AuthResponse {
        user: UserResponse::from(user),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: pair.expires_in,
    }
}
