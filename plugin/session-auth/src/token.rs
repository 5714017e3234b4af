//! Token Service
//!
//! HS256-signed identity tokens. Access and refresh tokens share one layout
//! and differ in their `kind` claim and lifetime. Validation enforces the
//! algorithm, the signature and the expiry; it does not care about the kind.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{IdentityClaims, TokenKind, TokenSubject};

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

/// The only algorithm tokens are signed and accepted with
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Freshly minted access + refresh tokens
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

// Out-of-range lifetimes saturate so issuing fails instead of panicking
fn lifetime(seconds: i64) -> Duration {
    Duration::try_seconds(seconds).unwrap_or(Duration::MAX)
}

/// Issues and validates signed identity tokens
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Create a token service from the shared configuration
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[&config.jwt_issuer]);
        validation.set_audience(&[&config.jwt_audience]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss", "aud"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            header: Header::new(TOKEN_ALGORITHM),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            access_ttl: lifetime(config.access_token_expiration),
            refresh_ttl: lifetime(config.refresh_token_expiration),
        }
    }

    /// Configured lifetime for a token kind
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// Sign a token for `subject` that expires `ttl` from now
    pub fn issue(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now.checked_add_signed(ttl).ok_or_else(|| {
            tracing::error!(kind = %kind, ttl = ttl.num_seconds(), "Token expiry out of range");
            AuthError::Internal
        })?;

        let claims = IdentityClaims {
            sub: subject.id,
            email: subject.email.clone(),
            username: subject.username.clone(),
            kind,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };

        encode(&self.header, &claims, &self.encoding_key).map_err(|err| {
            tracing::error!(kind = %kind, "Token signing failed: {:?}", err);
            AuthError::Internal
        })
    }

    /// Issue an access and a refresh token with their configured lifetimes
    pub fn issue_pair(&self, subject: &TokenSubject) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue(subject, TokenKind::Access, self.access_ttl)?,
            refresh_token: self.issue(subject, TokenKind::Refresh, self.refresh_ttl)?,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Validate a token and return its claims
    ///
    /// Fails with `TokenExpired` once `exp` is reached, or `TokenInvalid`
    /// naming the fault. The signature is always checked before expiry.
    pub fn validate(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)?.claims;

        // jsonwebtoken accepts exp == now
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }

    /// Validate a token and require it to be of `kind`
    pub fn validate_kind(&self, token: &str, kind: TokenKind) -> Result<IdentityClaims, AuthError> {
        let claims = self.validate(token)?;
        if claims.kind != kind {
            return Err(AuthError::TokenInvalid(crate::error::TokenFault::WrongKind));
        }
        Ok(claims)
    }

    #[cfg(test)]
    pub(crate) fn with_unusable_signer(config: &AuthConfig) -> Self {
        // HMAC key paired with an RSA header: every encode fails
        Self {
            header: Header::new(Algorithm::RS256),
            ..Self::new(config)
        }
    }
}
