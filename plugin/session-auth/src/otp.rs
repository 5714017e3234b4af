//! One-Time Codes
//!
//! Numeric codes mailed to an owner (an email address) and redeemable once.
//! All state lives in the [`CacheStore`]:
//!
//! - `otp:{purpose}:code:{owner}` holds the outstanding code for its TTL
//! - `otp:{purpose}:requests:{owner}` counts issuances inside the request window
//! - `otp:{purpose}:attempts:{owner}` counts wrong guesses against the current code
//!
//! Single use rests on the atomic delete of the code key: of several callers
//! presenting the right code at once, only the one whose delete removed the
//! key succeeds.

use crate::cache::CacheStore;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::hasher::constant_time_eq;
use crate::models::normalize_email;
use crate::notifier::Notifier;

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a code unlocks; codes of one purpose never redeem another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    /// Stand-alone request/redeem exchange
    Verification,
    /// Second step of a password login
    Login,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Verification => "verify",
            OtpPurpose::Login => "login",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            OtpPurpose::Verification => "Your OTP Code",
            OtpPurpose::Login => "Your login code",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to code issuance and redemption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    pub length: u32,
    pub ttl: Duration,
    pub max_requests: i64,
    pub request_window: Duration,
    pub max_attempts: i64,
}

impl From<&AuthConfig> for OtpPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            length: config.otp_length,
            ttl: config.otp_ttl(),
            max_requests: config.otp_max_requests,
            request_window: config.otp_request_window(),
            max_attempts: config.otp_max_attempts,
        }
    }
}

/// A freshly stored code
#[derive(Clone)]
pub struct IssuedOtp {
    code: String,
    expires_in: Duration,
}

impl IssuedOtp {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }
}

impl fmt::Debug for IssuedOtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedOtp")
            .field("code", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

struct OtpKeys {
    code: String,
    requests: String,
    attempts: String,
}

impl OtpKeys {
    fn new(purpose: OtpPurpose, owner: &str) -> Self {
        Self {
            code: format!("otp:{purpose}:code:{owner}"),
            requests: format!("otp:{purpose}:requests:{owner}"),
            attempts: format!("otp:{purpose}:attempts:{owner}"),
        }
    }
}

/// Issues, delivers and redeems one-time codes
pub struct OtpService {
    cache: Arc<dyn CacheStore>,
    notifier: Arc<dyn Notifier>,
    policy: OtpPolicy,
}

impl OtpService {
    pub fn new(cache: Arc<dyn CacheStore>, notifier: Arc<dyn Notifier>, policy: OtpPolicy) -> Self {
        Self {
            cache,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Store a new code for `owner` and deliver it
    ///
    /// Any outstanding code for the same owner and purpose is replaced. When
    /// delivery fails the code stays redeemable and the error is
    /// `NotificationFailed`, so the caller can [`resend`](Self::resend).
    pub async fn generate(&self, owner: &str, purpose: OtpPurpose) -> Result<IssuedOtp, AuthError> {
        let owner = normalize_owner(owner)?;
        let keys = OtpKeys::new(purpose, &owner);

        self.check_issuance(&keys, &owner, purpose).await?;

        let code = generate_code(self.policy.length)?;
        self.cache.set(&keys.code, &code, self.policy.ttl).await?;
        self.cache.delete(&[keys.attempts.as_str()]).await?;

        tracing::info!(owner = %owner, purpose = %purpose, "One-time code issued");

        self.deliver(&owner, purpose, &code).await?;

        Ok(IssuedOtp {
            code,
            expires_in: self.policy.ttl,
        })
    }

    /// Deliver the outstanding code again without replacing it
    ///
    /// Counts against the issuance limit. Returns the code's remaining lifetime.
    pub async fn resend(&self, owner: &str, purpose: OtpPurpose) -> Result<Duration, AuthError> {
        let owner = normalize_owner(owner)?;
        let keys = OtpKeys::new(purpose, &owner);

        let code = self
            .cache
            .get(&keys.code)
            .await?
            .ok_or(AuthError::OtpNotFound)?;

        self.check_issuance(&keys, &owner, purpose).await?;
        self.deliver(&owner, purpose, &code).await?;

        let remaining = self.cache.ttl(&keys.code).await?.unwrap_or(self.policy.ttl);
        tracing::info!(owner = %owner, purpose = %purpose, "One-time code resent");
        Ok(remaining)
    }

    /// Consume the code for `owner` if `supplied` matches it
    ///
    /// - no code stored (never issued, expired or already used): `OtpNotFound`
    /// - wrong code: `OtpMismatch`, the code stays valid
    /// - the wrong guess that exhausts the attempt budget burns the code: `RateLimited`
    pub async fn redeem(
        &self,
        owner: &str,
        purpose: OtpPurpose,
        supplied: &str,
    ) -> Result<(), AuthError> {
        let owner = normalize_owner(owner)?;
        let keys = OtpKeys::new(purpose, &owner);

        let stored = self
            .cache
            .get(&keys.code)
            .await?
            .ok_or(AuthError::OtpNotFound)?;

        if !constant_time_eq(stored.as_bytes(), supplied.trim().as_bytes()) {
            let attempts = self
                .cache
                .increment_with_expiry(&keys.attempts, self.policy.ttl)
                .await?;

            if attempts >= self.policy.max_attempts {
                self.cache.delete(&[keys.code.as_str(), keys.attempts.as_str()]).await?;
                tracing::warn!(owner = %owner, purpose = %purpose, attempts, "One-time code burned after repeated mismatches");
                return Err(AuthError::RateLimited { retry_after: None });
            }

            tracing::debug!(owner = %owner, purpose = %purpose, attempts, "One-time code mismatch");
            return Err(AuthError::OtpMismatch);
        }

        // Losing the delete race means another caller already used this code
        if self.cache.delete(&[keys.code.as_str()]).await? == 0 {
            return Err(AuthError::OtpNotFound);
        }
        self.cache.delete(&[keys.attempts.as_str()]).await?;

        tracing::info!(owner = %owner, purpose = %purpose, "One-time code redeemed");
        Ok(())
    }

    async fn check_issuance(
        &self,
        keys: &OtpKeys,
        owner: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AuthError> {
        let count = self
            .cache
            .increment_with_expiry(&keys.requests, self.policy.request_window)
            .await?;

        if count > self.policy.max_requests {
            let retry_after = self
                .cache
                .ttl(&keys.requests)
                .await?
                .map(|left| left.as_secs().max(1));
            tracing::warn!(owner = %owner, purpose = %purpose, count, "One-time code issuance rate limited");
            return Err(AuthError::RateLimited { retry_after });
        }

        Ok(())
    }

    async fn deliver(&self, owner: &str, purpose: OtpPurpose, code: &str) -> Result<(), AuthError> {
        let body = format!("Your OTP code is: {code}");

        self.notifier
            .send(owner, purpose.subject(), &body)
            .await
            .map_err(|err| {
                tracing::warn!(owner = %owner, purpose = %purpose, reason = err.kind(), "One-time code delivery failed");
                match err {
                    AuthError::NotificationFailed(_) => err,
                    other => AuthError::NotificationFailed(other.to_string()),
                }
            })
    }
}

fn normalize_owner(owner: &str) -> Result<String, AuthError> {
    let owner = normalize_email(owner);
    if owner.is_empty() {
        return Err(AuthError::Validation("owner is required".to_string()));
    }
    Ok(owner)
}

/// Uniformly distributed zero-padded decimal code of `length` digits
fn generate_code(length: u32) -> Result<String, AuthError> {
    let modulus = 10u64.pow(length);
    // Largest multiple of the modulus; draws at or above it would bias low digits
    let zone = u64::MAX - (u64::MAX % modulus);

    let mut buf = [0u8; 8];
    loop {
        OsRng.try_fill_bytes(&mut buf).map_err(|err| {
            tracing::error!("Secure random source failed: {}", err);
            AuthError::Entropy
        })?;

        let value = u64::from_le_bytes(buf);
        if value < zone {
            return Ok(format!(
                "{:0width$}",
                value % modulus,
                width = length as usize
            ));
        }
    }
}
